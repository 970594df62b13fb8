use crate::session::{Item, Session};
use chrono::{NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// US calling zones, modeled as fixed offsets from Eastern. Good enough for
/// ordering a morning dial plan; this is not a DST-aware clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Eastern,
    Central,
    Mountain,
    Pacific,
    Alaska,
    Hawaii,
}

impl Zone {
    pub fn all() -> &'static [Zone] {
        &[
            Zone::Eastern,
            Zone::Central,
            Zone::Mountain,
            Zone::Pacific,
            Zone::Alaska,
            Zone::Hawaii,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Eastern => "eastern",
            Zone::Central => "central",
            Zone::Mountain => "mountain",
            Zone::Pacific => "pacific",
            Zone::Alaska => "alaska",
            Zone::Hawaii => "hawaii",
        }
    }

    /// Short label for dial-plan lines.
    pub fn label(&self) -> &'static str {
        match self {
            Zone::Eastern => "ET",
            Zone::Central => "CT",
            Zone::Mountain => "MT",
            Zone::Pacific => "PT",
            Zone::Alaska => "AKT",
            Zone::Hawaii => "HT",
        }
    }

    /// Hours this zone trails Eastern.
    pub fn hours_behind_eastern(&self) -> i64 {
        match self {
            Zone::Eastern => 0,
            Zone::Central => 1,
            Zone::Mountain => 2,
            Zone::Pacific => 3,
            Zone::Alaska => 4,
            Zone::Hawaii => 5,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = crate::error::EngineError;

    /// Accepts zone names ("pacific"), short labels ("PT"), and the
    /// "US/Pacific" identifiers CRM records carry.
    fn from_str(s: &str) -> crate::error::Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("us/").unwrap_or(&normalized);
        match name {
            "eastern" | "et" => Ok(Zone::Eastern),
            "central" | "ct" => Ok(Zone::Central),
            "mountain" | "mt" => Ok(Zone::Mountain),
            "pacific" | "pt" => Ok(Zone::Pacific),
            "alaska" | "akt" | "akst" => Ok(Zone::Alaska),
            "hawaii" | "ht" | "hst" => Ok(Zone::Hawaii),
            _ => Err(crate::error::EngineError::InvalidTimezone(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Timezone resolution
// ---------------------------------------------------------------------------

/// Which rung of the resolution chain decided a contact's zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ExplicitField,
    StateInferred,
    AreaCodeInferred,
    Unknown,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::ExplicitField => "explicit_field",
            ResolutionSource::StateInferred => "state_inferred",
            ResolutionSource::AreaCodeInferred => "area_code_inferred",
            ResolutionSource::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimezoneResolution {
    pub zone: Option<Zone>,
    pub source: ResolutionSource,
}

/// Resolve a contact's calling zone: explicit timezone field, then billing
/// state, then phone area code. An explicit value that parses to nothing
/// falls through rather than poisoning the chain.
pub fn resolve_timezone(item: &Item) -> TimezoneResolution {
    if let Some(explicit) = item.timezone.as_deref() {
        if let Ok(zone) = Zone::from_str(explicit) {
            return TimezoneResolution {
                zone: Some(zone),
                source: ResolutionSource::ExplicitField,
            };
        }
    }
    if let Some(state) = item.state.as_deref() {
        if let Some(zone) = zone_for_state(state) {
            return TimezoneResolution {
                zone: Some(zone),
                source: ResolutionSource::StateInferred,
            };
        }
    }
    if let Some(phone) = item.phone.as_deref() {
        if let Some(zone) = area_code_from_phone(phone).and_then(|c| zone_for_area_code(&c)) {
            return TimezoneResolution {
                zone: Some(zone),
                source: ResolutionSource::AreaCodeInferred,
            };
        }
    }
    TimezoneResolution {
        zone: None,
        source: ResolutionSource::Unknown,
    }
}

fn zone_for_state(state: &str) -> Option<Zone> {
    let key = state.trim().to_ascii_uppercase();
    let zone = match key.as_str() {
        "CT" | "DC" | "DE" | "FL" | "GA" | "IN" | "MA" | "MD" | "ME" | "MI" | "NC" | "NH"
        | "NJ" | "NY" | "OH" | "PA" | "RI" | "SC" | "VA" | "VT" | "WV" | "CONNECTICUT"
        | "DISTRICT OF COLUMBIA" | "DELAWARE" | "FLORIDA" | "GEORGIA" | "INDIANA"
        | "MASSACHUSETTS" | "MARYLAND" | "MAINE" | "MICHIGAN" | "NORTH CAROLINA"
        | "NEW HAMPSHIRE" | "NEW JERSEY" | "NEW YORK" | "OHIO" | "PENNSYLVANIA"
        | "RHODE ISLAND" | "SOUTH CAROLINA" | "VIRGINIA" | "VERMONT" | "WEST VIRGINIA" => {
            Zone::Eastern
        }
        "AL" | "AR" | "IA" | "IL" | "KS" | "KY" | "LA" | "MN" | "MO" | "MS" | "ND" | "NE"
        | "OK" | "SD" | "TN" | "TX" | "WI" | "ALABAMA" | "ARKANSAS" | "IOWA" | "ILLINOIS"
        | "KANSAS" | "KENTUCKY" | "LOUISIANA" | "MINNESOTA" | "MISSOURI" | "MISSISSIPPI"
        | "NORTH DAKOTA" | "NEBRASKA" | "OKLAHOMA" | "SOUTH DAKOTA" | "TENNESSEE" | "TEXAS"
        | "WISCONSIN" => Zone::Central,
        "AZ" | "CO" | "ID" | "MT" | "NM" | "UT" | "WY" | "ARIZONA" | "COLORADO" | "IDAHO"
        | "MONTANA" | "NEW MEXICO" | "UTAH" | "WYOMING" => Zone::Mountain,
        "CA" | "NV" | "OR" | "WA" | "CALIFORNIA" | "NEVADA" | "OREGON" | "WASHINGTON" => {
            Zone::Pacific
        }
        "AK" | "ALASKA" => Zone::Alaska,
        "HI" | "HAWAII" => Zone::Hawaii,
        _ => return None,
    };
    Some(zone)
}

/// NANP area code to zone. Codes straddling a boundary are pinned to where
/// the bulk of their numbers live.
fn zone_for_area_code(code: &str) -> Option<Zone> {
    let zone = match code {
        "201" | "202" | "203" | "207" | "212" | "215" | "216" | "239" | "240" | "248" | "267"
        | "301" | "302" | "305" | "313" | "315" | "321" | "336" | "347" | "352" | "386"
        | "401" | "404" | "407" | "410" | "412" | "413" | "434" | "440" | "443" | "484"
        | "508" | "513" | "516" | "518" | "540" | "551" | "561" | "570" | "571" | "585"
        | "586" | "603" | "609" | "610" | "614" | "617" | "631" | "646" | "678" | "703"
        | "704" | "706" | "716" | "718" | "732" | "740" | "754" | "757" | "770" | "772"
        | "774" | "781" | "786" | "802" | "803" | "804" | "813" | "814" | "828" | "845"
        | "848" | "856" | "857" | "860" | "862" | "863" | "904" | "908" | "910" | "914"
        | "917" | "919" | "941" | "954" | "973" | "978" => Zone::Eastern,
        "205" | "210" | "214" | "217" | "219" | "224" | "225" | "228" | "254" | "256" | "262"
        | "281" | "309" | "312" | "314" | "316" | "317" | "318" | "319" | "320" | "331"
        | "334" | "346" | "361" | "402" | "405" | "409" | "414" | "417" | "430" | "432"
        | "456" | "469" | "479" | "501" | "502" | "504" | "507" | "512" | "515" | "531"
        | "534" | "563" | "573" | "601" | "608" | "612" | "615" | "618" | "620" | "630"
        | "636" | "641" | "651" | "660" | "662" | "682" | "701" | "708" | "713" | "715"
        | "717" | "731" | "737" | "743" | "763" | "769" | "773" | "779" | "806" | "815"
        | "816" | "817" | "830" | "832" | "847" | "850" | "870" | "872" | "901" | "903"
        | "913" | "915" | "920" | "936" | "940" | "952" | "956" | "972" | "979" => Zone::Central,
        "303" | "307" | "385" | "406" | "435" | "480" | "505" | "520" | "575" | "602" | "623"
        | "719" | "720" | "801" | "928" => Zone::Mountain,
        "206" | "209" | "213" | "253" | "310" | "323" | "360" | "408" | "415" | "424" | "425"
        | "442" | "503" | "509" | "510" | "530" | "541" | "559" | "562" | "619" | "626"
        | "628" | "650" | "657" | "661" | "669" | "702" | "707" | "714" | "725" | "747"
        | "760" | "775" | "805" | "818" | "831" | "858" | "909" | "916" | "925" | "949"
        | "951" | "971" => Zone::Pacific,
        _ => return None,
    };
    Some(zone)
}

static NON_DIGIT_RE: OnceLock<Regex> = OnceLock::new();

fn non_digit_re() -> &'static Regex {
    NON_DIGIT_RE.get_or_init(|| Regex::new(r"\D").unwrap())
}

/// Pull the area code out of whatever formatting the CRM stored. Needs at
/// least ten digits to trust; an 11-digit number sheds its leading country 1.
fn area_code_from_phone(phone: &str) -> Option<String> {
    let digits = non_digit_re().replace_all(phone, "").into_owned();
    let digits = if digits.len() == 11 && digits.starts_with('1') {
        &digits[1..]
    } else {
        digits.as_str()
    };
    if digits.len() < 10 {
        return None;
    }
    Some(digits[..3].to_string())
}

// ---------------------------------------------------------------------------
// Title seniority
// ---------------------------------------------------------------------------

static CHIEF_RE: OnceLock<Regex> = OnceLock::new();
static PRINCIPAL_RE: OnceLock<Regex> = OnceLock::new();
static VP_RE: OnceLock<Regex> = OnceLock::new();
static LEAD_RE: OnceLock<Regex> = OnceLock::new();

fn chief_re() -> &'static Regex {
    CHIEF_RE.get_or_init(|| Regex::new(r"\b(CHIEF|CEO|CFO|CTO|CRO|CMO|COO|CIO)\b").unwrap())
}

fn principal_re() -> &'static Regex {
    PRINCIPAL_RE.get_or_init(|| Regex::new(r"\b(FOUNDER|OWNER|PRESIDENT)\b").unwrap())
}

fn vp_re() -> &'static Regex {
    VP_RE.get_or_init(|| Regex::new(r"\bVP\b").unwrap())
}

fn lead_re() -> &'static Regex {
    LEAD_RE.get_or_init(|| Regex::new(r"\bLEAD\b").unwrap())
}

/// Rank a job title for display on the sheet: 0 is the corner office, 4 is
/// everyone else, 99 means no title on record. Ordering never uses this.
pub fn title_seniority(title: Option<&str>) -> u8 {
    let Some(title) = title else { return 99 };
    let t = title.trim().to_ascii_uppercase();
    if t.is_empty() {
        return 99;
    }
    if chief_re().is_match(&t) {
        return 0;
    }
    if principal_re().is_match(&t) && !t.contains("VICE") {
        return 0;
    }
    if t.contains("SVP") || t.contains("SENIOR VICE") {
        return 1;
    }
    if vp_re().is_match(&t) || t.contains("VICE PRESIDENT") {
        return 1;
    }
    if t.contains("DIRECTOR") || t.contains("HEAD OF") {
        return 2;
    }
    if t.contains("MANAGER") || lead_re().is_match(&t) {
        return 3;
    }
    4
}

// ---------------------------------------------------------------------------
// Call windows
// ---------------------------------------------------------------------------

const MINUTES_PER_DAY: i64 = 24 * 60;
/// Prime window: local 08:00 to 10:00.
const PRIME_START_MIN: i64 = 8 * 60;
const PRIME_END_MIN: i64 = 10 * 60;
/// Dead zone: local 11:00 to 14:00, when pickup rates crater.
const DEAD_START_MIN: i64 = 11 * 60;
const DEAD_END_MIN: i64 = 14 * 60;
/// Secondary window: local 15:00 to 17:00.
const SECONDARY_START_MIN: i64 = 15 * 60;
const SECONDARY_END_MIN: i64 = 17 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallWindow {
    Prime,
    Secondary,
    DeadZone,
    Open,
    Unknown,
}

impl CallWindow {
    fn classify(local_minutes: i64) -> Self {
        match local_minutes {
            m if (PRIME_START_MIN..PRIME_END_MIN).contains(&m) => CallWindow::Prime,
            m if (DEAD_START_MIN..DEAD_END_MIN).contains(&m) => CallWindow::DeadZone,
            m if (SECONDARY_START_MIN..SECONDARY_END_MIN).contains(&m) => CallWindow::Secondary,
            _ => CallWindow::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallWindow::Prime => "prime",
            CallWindow::Secondary => "secondary",
            CallWindow::DeadZone => "dead_zone",
            CallWindow::Open => "open",
            CallWindow::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CallWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sheet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CallSheetEntry {
    pub external_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<Zone>,
    pub source: ResolutionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_time: Option<String>,
    pub window: CallWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_until_prime_close: Option<i64>,
    pub seniority: u8,
}

fn format_minutes(local_minutes: i64) -> String {
    let hour24 = local_minutes / 60;
    let minute = local_minutes % 60;
    let (hour12, meridiem) = match hour24 {
        0 => (12, "AM"),
        1..=11 => (hour24, "AM"),
        12 => (12, "PM"),
        _ => (hour24 - 12, "PM"),
    };
    format!("{hour12}:{minute:02} {meridiem}")
}

/// Parse an operator wall-clock override in 24-hour `HH:MM` form. The CLI
/// and server accept one so a sheet can be rendered from a host whose clock
/// does not run in the operator's zone.
pub fn parse_clock(s: &str) -> crate::error::Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| crate::error::EngineError::InvalidClock(s.to_string()))
}

/// Order the session's contacts into a dial plan for right now.
///
/// Contacts whose prime window closes soonest come first; anyone sitting in
/// their local dead zone drops behind every live contact, and contacts with
/// no resolvable zone land at the very end for manual ordering. Ties keep
/// the order the contacts were fetched in, so the same inputs always yield
/// the same sheet.
pub fn build(session: &Session, operator_zone: Zone, operator_now: NaiveTime) -> Vec<CallSheetEntry> {
    let operator_minutes = i64::from(operator_now.hour()) * 60 + i64::from(operator_now.minute());
    let operator_behind = operator_zone.hours_behind_eastern();

    let mut entries: Vec<CallSheetEntry> = session
        .items
        .iter()
        .map(|item| entry_for(item, operator_minutes, operator_behind))
        .collect();

    // Stable sort: discovery order breaks every tie.
    entries.sort_by_key(|e| {
        let bucket: u8 = match (e.zone, e.window) {
            (None, _) => 2,
            (_, CallWindow::DeadZone) => 1,
            _ => 0,
        };
        (bucket, e.minutes_until_prime_close.unwrap_or(i64::MAX))
    });
    entries
}

fn entry_for(item: &Item, operator_minutes: i64, operator_behind: i64) -> CallSheetEntry {
    let resolution = resolve_timezone(item);
    let (local_time, window, minutes_until_prime_close) = match resolution.zone {
        Some(zone) => {
            let shift = (operator_behind - zone.hours_behind_eastern()) * 60;
            let local = (operator_minutes + shift).rem_euclid(MINUTES_PER_DAY);
            let until_close = (PRIME_END_MIN - local).rem_euclid(MINUTES_PER_DAY);
            (
                Some(format_minutes(local)),
                CallWindow::classify(local),
                Some(until_close),
            )
        }
        None => (None, CallWindow::Unknown, None),
    };
    CallSheetEntry {
        external_id: item.external_id.clone(),
        name: item.name.clone(),
        company: item.company.clone(),
        title: item.title.clone(),
        phone: item.phone.clone(),
        zone: resolution.zone,
        source: resolution.source,
        local_time,
        window,
        minutes_until_prime_close,
        seniority: title_seniority(item.title.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Summary rendering
// ---------------------------------------------------------------------------

fn entry_line(index: usize, entry: &CallSheetEntry) -> String {
    let mut line = format!("  {}. {}", index, entry.name);
    if let Some(company) = &entry.company {
        line.push_str(&format!(" — {company}"));
    }
    if let Some(title) = &entry.title {
        line.push_str(&format!(" ({title})"));
    }
    if let Some(phone) = &entry.phone {
        line.push_str(&format!(" · {phone}"));
    }
    match (&entry.zone, &entry.local_time) {
        (Some(zone), Some(local)) => line.push_str(&format!(" · {} {}", zone.label(), local)),
        _ => line.push_str(" · timezone unknown"),
    }
    line
}

/// Plain-text dial plan for the notify stage.
pub fn render_summary(session: &Session, entries: &[CallSheetEntry]) -> String {
    let campaign = session.campaign.as_deref().unwrap_or(&session.resource_key);
    let date = session.calling_date.as_deref().unwrap_or("today");
    let mut out = format!("Dial plan — {campaign} ({date})\n");
    out.push_str(&format!(
        "{} contacts · {} prepped · {} written · {} failed\n",
        session.items.len(),
        session.stats.generated,
        session.stats.written,
        session.stats.failed,
    ));

    let live: Vec<&CallSheetEntry> = entries
        .iter()
        .filter(|e| e.zone.is_some() && e.window != CallWindow::DeadZone)
        .collect();
    let dead: Vec<&CallSheetEntry> = entries
        .iter()
        .filter(|e| e.zone.is_some() && e.window == CallWindow::DeadZone)
        .collect();
    let unknown: Vec<&CallSheetEntry> = entries.iter().filter(|e| e.zone.is_none()).collect();

    if !live.is_empty() {
        out.push_str("\nCall order (prime window closing soonest):\n");
        for (i, entry) in live.iter().enumerate() {
            out.push_str(&entry_line(i + 1, entry));
            out.push('\n');
        }
    }
    if !dead.is_empty() {
        out.push_str("\nDead zone — hold until after lunch:\n");
        for (i, entry) in dead.iter().enumerate() {
            out.push_str(&entry_line(i + 1, entry));
            out.push('\n');
        }
    }
    if !unknown.is_empty() {
        out.push_str("\nUnknown timezone — order manually:\n");
        for (i, entry) in unknown.iter().enumerate() {
            out.push_str(&entry_line(i + 1, entry));
            out.push('\n');
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
