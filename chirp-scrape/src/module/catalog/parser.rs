///! RadioReference page parser
///!
///! Listing tables (`table.rrdbTable`) become partial channel records in
///! document order. Detail pages only complete what a listing row left out.
///! Unknown or malformed cells are left absent rather than guessed.

use chirp_common::{Band, ChannelRecord, DtcsPolarity, Duplex, ToneMode};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::urls::absolutize;
use crate::error::{ChirpError, Result};

const JURISDICTION_KEYWORDS: [&str; 8] = [
    "county",
    "parish",
    "borough",
    "city",
    "municipality",
    "census area",
    "district",
    "province",
];

/// CTCSS tones outside this range are not tones
const TONE_RANGE_HZ: (f64, f64) = (50.0, 260.0);

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ChirpError::parse("selector", format!("{}: {}", css, e)))
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ChirpError::parse("pattern", e.to_string()))
}

/// Normalise whitespace in a plain-text value.
fn clean_cell(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef) -> String {
    clean_cell(&element.text().collect::<Vec<_>>().join(" "))
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = text.len().checked_sub(suffix.len())?;
    if text.is_char_boundary(cut) && text[cut..].eq_ignore_ascii_case(suffix) {
        Some(&text[..cut])
    } else {
        None
    }
}

/// Removes the trailing "Amateur Radio" and parenthetical parts of a page title,
/// e.g. `"Cook County, Illinois (IL) Amateur Radio"` -> `"Cook County, Illinois"`.
pub fn strip_title_decorations(title: &str) -> String {
    let mut text = clean_cell(title);
    loop {
        let before = text.len();
        if let Some(rest) = strip_suffix_ignore_case(&text, "amateur radio") {
            text = rest.trim_end().to_string();
        }
        if text.ends_with(')') {
            if let Some(open) = text.rfind('(') {
                text = text[..open].trim_end().to_string();
            }
        }
        if text.len() == before {
            return text;
        }
    }
}

/// Whether a page title names a jurisdiction (county, city, parish...).
///
/// After stripping decorations the title must contain a comma and either a
/// jurisdiction keyword or end in a `Name, State` shape.
pub fn is_jurisdiction_title(title: &str) -> bool {
    let text = strip_title_decorations(title);
    if !text.contains(',') {
        return false;
    }

    let lower = text.to_lowercase();
    if JURISDICTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    match text.rsplit_once(',') {
        Some((place, state)) => {
            let state = state.trim();
            !place.trim().is_empty()
                && !state.is_empty()
                && state.chars().all(|c| c.is_ascii_alphabetic() || c == '.' || c == ' ')
        }
        None => false,
    }
}

/// Page title: `<title>` up to the first `" - "`, else the first `<h2>`.
pub fn parse_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let title_sel = Selector::parse("title").ok()?;
    if let Some(title) = document.select(&title_sel).next() {
        let text = element_text(title);
        let head = text.split(" - ").next().unwrap_or_default().trim();
        if !head.is_empty() {
            return Some(head.to_string());
        }
    }

    let h2_sel = Selector::parse("h2").ok()?;
    document.select(&h2_sel).map(element_text).find(|t| !t.is_empty())
}

/// Compiled patterns shared by listing and detail parsing
struct Patterns {
    frequency: Regex,
    number: Regex,
    dcs_code: Regex,
    duplex_token: Regex,
    digital_mode: Regex,
    any_mode: Regex,
    ctcss_label: Regex,
    dcs_label: Regex,
    offset_label: Regex,
    input_label: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            frequency: regex(r"\d{2,4}\.\d+")?,
            number: regex(r"\d+(?:\.\d+)?")?,
            dcs_code: regex(r"([0-7]{3})\s*([NIR])?")?,
            duplex_token: regex(r"(?i)(?:^|\s)(\+|-|plus|minus)(?:\s|$)")?,
            digital_mode: regex(r"(?i)\b(DMR|D-?STAR|P-?25|YSF|C4FM|NXDN)\b")?,
            any_mode: regex(r"(?i)\b(DMR|D-?STAR|P-?25|YSF|C4FM|NXDN|FMN|NFM|FM|AM)\b")?,
            ctcss_label: regex(r"(?i)\b(?:CC|CTCSS|PL|Tone)[:#\s]*([0-9]+\.?[0-9]*)")?,
            dcs_label: regex(r"(?i)\b(?:DCS|DPL|DTCS|D-PL)[:#\s]*([0-7]{3})\s*([NIR])?\b")?,
            offset_label: regex(r"(?i)\boffset\b[:\s]*([+-])?\s*(\d+(?:\.\d+)?)")?,
            input_label: regex(r"(?i)\binput\b[:\s]*(\d{2,4}\.\d+)")?,
        })
    }

    fn first_frequency(&self, text: &str) -> Option<f64> {
        self.frequency
            .find(text)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|f| *f > 0.0)
    }
}

/// Squelch evidence found on a page
#[derive(Debug, Default, Clone, PartialEq)]
struct ToneInfo {
    mode: Option<ToneMode>,
    r_tone: Option<f64>,
    c_tone: Option<f64>,
    dtcs_code: Option<u16>,
    dtcs_polarity: Option<DtcsPolarity>,
}

impl ToneInfo {
    fn tone(hz: f64) -> Self {
        Self {
            mode: Some(ToneMode::Tone),
            r_tone: Some(hz),
            c_tone: Some(hz),
            ..Default::default()
        }
    }

    fn dtcs(code: u16, polarity: Option<DtcsPolarity>) -> Self {
        Self {
            mode: Some(ToneMode::Dtcs),
            dtcs_code: Some(code),
            dtcs_polarity: polarity,
            ..Default::default()
        }
    }

    fn apply_missing(&self, record: &mut ChannelRecord) {
        if record.tone_mode.is_none() {
            record.tone_mode = self.mode;
        }
        // tone pairs are never mixed across sources; a lone known tone is mirrored
        match (record.r_tone_freq, record.c_tone_freq) {
            (None, None) => {
                record.r_tone_freq = self.r_tone;
                record.c_tone_freq = self.c_tone;
            }
            (Some(r_tone), None) => record.c_tone_freq = Some(r_tone),
            (None, Some(c_tone)) => record.r_tone_freq = Some(c_tone),
            (Some(_), Some(_)) => {}
        }
        if record.dtcs_code.is_none() {
            record.dtcs_code = self.dtcs_code;
            record.dtcs_polarity = record.dtcs_polarity.or(self.dtcs_polarity);
        }
    }
}

fn polarity_letter(letter: &str) -> DtcsPolarity {
    match letter {
        "N" => DtcsPolarity::NN,
        _ => DtcsPolarity::RR,
    }
}

fn in_tone_range(hz: f64) -> bool {
    (TONE_RANGE_HZ.0..=TONE_RANGE_HZ.1).contains(&hz)
}

/// Reads a listing tone cell: `CSQ` or empty means carrier squelch,
/// `D023N` / `023 DPL` are DCS codes, a number in range is a CTCSS tone.
fn parse_tone_cell(text: &str, patterns: &Patterns) -> ToneInfo {
    let upper = text.trim().to_uppercase();
    if upper.is_empty() || upper == "CSQ" {
        return ToneInfo::default();
    }

    if upper.starts_with('D') || upper.contains("DPL") || upper.contains("DCS") {
        if let Some(caps) = patterns.dcs_code.captures(&upper) {
            if let Ok(code) = caps[1].parse::<u16>() {
                let polarity = caps.get(2).map(|m| polarity_letter(m.as_str()));
                return ToneInfo::dtcs(code, polarity);
            }
        }
        return ToneInfo::default();
    }

    patterns
        .number
        .find(&upper)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|hz| in_tone_range(*hz))
        .map(ToneInfo::tone)
        .unwrap_or_default()
}

/// CHIRP mode name for a mode token seen on a page.
fn chirp_mode(token: &str) -> &'static str {
    match token.to_uppercase().replace('-', "").as_str() {
        "DMR" => "DMR",
        "DSTAR" => "DV",
        "P25" => "P25",
        "YSF" | "C4FM" => "DN",
        "NXDN" => "DIG",
        "FMN" | "NFM" => "NFM",
        "AM" => "AM",
        _ => "FM",
    }
}

/// Column positions of one listing table
#[derive(Debug, Clone, PartialEq)]
struct Columns {
    frequency: usize,
    input: Option<usize>,
    callsign: Option<usize>,
    tone: Option<usize>,
    mode: Option<usize>,
    description: Vec<usize>,
}

impl Columns {
    /// Layout of the catalog's amateur tables when no header names the columns
    fn positional() -> Self {
        Self {
            frequency: 0,
            input: Some(1),
            callsign: Some(2),
            tone: Some(4),
            mode: None,
            description: vec![7, 6, 3],
        }
    }

    fn from_header(headers: &[String]) -> Option<Self> {
        let mut frequency = None;
        let mut input = None;
        let mut callsign = None;
        let mut tone = None;
        let mut mode = None;
        let mut description = Vec::new();

        for (i, header) in headers.iter().enumerate() {
            let h = header.to_lowercase();
            if h.contains("input") {
                input.get_or_insert(i);
            } else if h.contains("freq") || h == "output" {
                frequency.get_or_insert(i);
            } else if h.contains("call") {
                callsign.get_or_insert(i);
            } else if h.contains("tone") || h.contains("ctcss") || h == "pl" || h.contains("pl/dpl") {
                tone.get_or_insert(i);
            } else if h.contains("mode") {
                mode.get_or_insert(i);
            } else if h.contains("description") || h.contains("alpha tag") || h.contains("location") {
                description.push(i);
            }
        }

        Some(Self {
            frequency: frequency?,
            input,
            callsign,
            tone,
            mode,
            description,
        })
    }
}

fn is_subcategory_link(href: &str) -> bool {
    href.contains("/db/subcat/")
}

/// Catalog links that point at an individual entry rather than a browse page.
fn is_detail_link(href: &str) -> bool {
    const NOT_DETAIL: [&str; 5] = ["/db/browse", "/db/subcat", "/db/query", "/db/stid", "/db/ctid"];
    href.contains("/db/") && !NOT_DETAIL.iter().any(|b| href.contains(b))
}

fn parse_row(
    cells: &[String],
    hrefs: &[String],
    columns: &Columns,
    patterns: &Patterns,
    base_url: &str,
) -> Option<ChannelRecord> {
    let cell = |i: Option<usize>| i.and_then(|i| cells.get(i)).map(String::as_str).unwrap_or("");

    let frequency = patterns.first_frequency(cell(Some(columns.frequency)))?;

    let description = columns
        .description
        .iter()
        .map(|i| cell(Some(*i)))
        .find(|d| !d.is_empty())
        .unwrap_or("");
    let callsign = cell(columns.callsign);
    let name = if !callsign.is_empty() {
        callsign.to_string()
    } else if !description.is_empty() {
        description.to_string()
    } else {
        format!("{:.4}", frequency)
    };

    let mut record = ChannelRecord::new(name, frequency);
    record.band = Band::classify(frequency, &Band::ALL);

    let input = patterns.first_frequency(cell(columns.input));
    if let Some(input) = input {
        let split = ((input - frequency) * 1_000_000.0).round() / 1_000_000.0;
        if split.abs() < 1e-6 {
            record.duplex = Some(Duplex::Simplex);
        } else {
            record.duplex = Some(if split > 0.0 { Duplex::Plus } else { Duplex::Minus });
            record.offset_mhz = Some(split.abs());
        }
    } else {
        // Hints elsewhere in the row: "+", "minus", "0.600", "5.000"
        for (i, text) in cells.iter().enumerate() {
            if i == columns.frequency || columns.description.contains(&i) {
                continue;
            }
            if record.duplex.is_none() {
                if let Some(caps) = patterns.duplex_token.captures(text) {
                    record.duplex = Duplex::parse(&caps[1]);
                }
            }
            if record.offset_mhz.is_none() {
                if let Ok(value) = text.trim().parse::<f64>() {
                    if (value - 0.6).abs() < 0.001 || (value - 5.0).abs() < 0.01 {
                        record.offset_mhz = Some(value);
                    }
                }
            }
        }
    }

    parse_tone_cell(cell(columns.tone), patterns).apply_missing(&mut record);

    let mode_text = cell(columns.mode);
    record.mode = if !mode_text.is_empty() {
        patterns
            .any_mode
            .captures(mode_text)
            .map(|c| chirp_mode(&c[1]).to_string())
    } else {
        cells
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != columns.frequency && !columns.description.contains(i))
            .find_map(|(_, text)| patterns.digital_mode.captures(text))
            .map(|c| chirp_mode(&c[1]).to_string())
    };

    record.detail_url = hrefs
        .iter()
        .find(|href| is_detail_link(href))
        .map(|href| absolutize(base_url, href));

    Some(record)
}

/// Parses every frequency row of every listing table on the page.
///
/// Rows without a readable frequency are skipped. A page with no listing
/// table, or none whose header names a frequency column, is a structural error.
pub fn parse_listing(html: &str, base_url: &str) -> Result<Vec<ChannelRecord>> {
    let document = Html::parse_document(html);
    let patterns = Patterns::new()?;

    let table_sel = selector("table.rrdbTable")?;
    let tr_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td")?;
    let link_sel = selector("a[href]")?;

    let mut tables = 0;
    let mut usable_tables = 0;
    let mut records = Vec::new();

    for table in document.select(&table_sel) {
        tables += 1;

        let headers: Vec<String> = table
            .select(&tr_sel)
            .find(|tr| tr.select(&th_sel).next().is_some())
            .map(|tr| tr.select(&th_sel).map(element_text).collect())
            .unwrap_or_default();

        let columns = if headers.is_empty() {
            Columns::positional()
        } else {
            match Columns::from_header(&headers) {
                Some(columns) => columns,
                None => {
                    debug!("Skipping listing table without frequency column: {:?}", headers);
                    continue;
                }
            }
        };
        usable_tables += 1;

        for tr in table.select(&tr_sel) {
            let cells: Vec<String> = tr.select(&td_sel).map(element_text).collect();
            if cells.len() < 3 {
                continue;
            }
            let hrefs: Vec<String> = tr
                .select(&link_sel)
                .filter_map(|a| a.value().attr("href"))
                .map(str::to_string)
                .collect();

            match parse_row(&cells, &hrefs, &columns, &patterns, base_url) {
                Some(record) => records.push(record),
                None => debug!("Skipping row without a frequency: {:?}", cells),
            }
        }
    }

    if tables == 0 {
        return Err(ChirpError::parse("listing", "no rrdbTable listing table on page"));
    }
    if usable_tables == 0 {
        return Err(ChirpError::parse("listing", "no listing table has a frequency column"));
    }

    Ok(records)
}

/// Absolute URLs of the subcategory pages linked from a listing page.
pub fn subcategory_links(html: &str, base_url: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let link_sel = selector("a[href]")?;

    let mut links: Vec<String> = Vec::new();
    for href in document.select(&link_sel).filter_map(|a| a.value().attr("href")) {
        if is_subcategory_link(href) {
            let url = absolutize(base_url, href);
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    Ok(links)
}

/// The first county or city page linked from a ZIP listing or search result,
/// as `(ctid, link text)`. The link text may be empty.
pub fn first_ctid_link(html: &str) -> Result<Option<(u32, String)>> {
    let document = Html::parse_document(html);
    let link_sel = selector("a[href*=\"/db/browse/ctid/\"]")?;
    let ctid_re = regex(r"/db/browse/ctid/(\d+)")?;

    for link in document.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if let Some(ctid) = ctid_re.captures(href).and_then(|c| c[1].parse::<u32>().ok()) {
            return Ok(Some((ctid, element_text(link))));
        }
    }
    Ok(None)
}

/// Completes `base` from a repeater detail page.
///
/// Only fields the listing left absent are filled; values the listing had
/// always win.
pub fn parse_detail(html: &str, base: &ChannelRecord) -> Result<ChannelRecord> {
    let document = Html::parse_document(html);
    let patterns = Patterns::new()?;
    let body_sel = selector("body")?;

    let text = document
        .select(&body_sel)
        .next()
        .map(element_text)
        .unwrap_or_else(|| element_text(document.root_element()));

    let mut record = base.clone();

    if let Some(caps) = patterns.input_label.captures(&text) {
        if let Ok(input) = caps[1].parse::<f64>() {
            let split = ((input - record.frequency_mhz) * 1_000_000.0).round() / 1_000_000.0;
            if record.duplex.is_none() && split.abs() >= 1e-6 {
                record.duplex = Some(if split > 0.0 { Duplex::Plus } else { Duplex::Minus });
            }
            if record.offset_mhz.is_none() && split.abs() >= 1e-6 {
                record.offset_mhz = Some(split.abs());
            }
        }
    }

    if let Some(caps) = patterns.offset_label.captures(&text) {
        if record.duplex.is_none() {
            record.duplex = caps.get(1).and_then(|m| Duplex::parse(m.as_str()));
        }
        if record.offset_mhz.is_none() {
            record.offset_mhz = caps[2].parse::<f64>().ok().filter(|v| *v > 0.0 && *v < 100.0);
        }
    }

    if record.duplex.is_none() {
        if let Some(caps) = patterns.duplex_token.captures(&text) {
            record.duplex = Duplex::parse(&caps[1]);
        }
    }

    let tone = patterns
        .ctcss_label
        .captures_iter(&text)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .find(|hz| in_tone_range(*hz))
        .map(ToneInfo::tone);
    let dcs = patterns.dcs_label.captures(&text).and_then(|c| {
        let code = c[1].parse::<u16>().ok()?;
        let polarity = c.get(2).map(|m| polarity_letter(&m.as_str().to_uppercase()));
        Some(ToneInfo::dtcs(code, polarity))
    });
    if let Some(info) = tone.or(dcs) {
        info.apply_missing(&mut record);
    }

    if record.mode.is_none() {
        record.mode = patterns
            .any_mode
            .captures(&text)
            .map(|c| chirp_mode(&c[1]).to_string());
    }

    Ok(record)
}
