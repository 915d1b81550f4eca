//! Symbol whitelist and disambiguation stoplist.
//!
//! Both are loaded once at startup into immutable snapshots and shared behind
//! `Arc` with the extractor and writer. Nothing mutates them during a run.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::config::MAX_SYMBOL_LEN;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerMeta {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub active: bool,
}

#[derive(Debug, Default)]
pub struct WhitelistIndex {
    entries: HashMap<String, TickerMeta>,
}

impl WhitelistIndex {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, TickerMeta)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(sym, meta)| (sym.to_ascii_uppercase(), meta))
                .collect(),
        }
    }

    /// Builds an index where every symbol is active and carries no metadata.
    pub fn from_symbols(symbols: &[&str]) -> Self {
        Self::from_entries(symbols.iter().map(|s| {
            (
                s.to_string(),
                TickerMeta {
                    active: true,
                    ..Default::default()
                },
            )
        }))
    }

    /// Loads a flat delimited table: header row, symbol in the first column,
    /// optional name/sector/industry/active columns located by header name.
    /// A missing or empty list is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Whitelist(format!("cannot read {}: {e}", path.display()))
        })?;
        let index = Self::parse(&content)?;
        if index.is_empty() {
            return Err(AppError::Whitelist(format!(
                "{} contains no usable symbols",
                path.display()
            )));
        }
        info!(
            symbols = index.len(),
            active = index.active_count(),
            "Whitelist loaded from {}",
            path.display()
        );
        Ok(index)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let delimiter = sniff_delimiter(content);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = reader.headers()?.clone();
        let column = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let name_col = column(&["name", "company", "unternehmensname"]);
        let sector_col = column(&["sector", "sektor"]);
        let industry_col = column(&["industry", "branche"]);
        let active_col = column(&["active", "aktiv"]);

        let mut entries = HashMap::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    skipped += 1;
                    warn!("Whitelist row unreadable: {e}");
                    continue;
                }
            };
            let symbol = record.get(0).unwrap_or("").to_ascii_uppercase();
            if !is_valid_symbol(&symbol) {
                skipped += 1;
                continue;
            }
            let field = |col: Option<usize>| {
                col.and_then(|i| record.get(i))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let active = field(active_col)
                .map(|v| parse_flag(&v))
                .unwrap_or(true);
            entries.insert(
                symbol,
                TickerMeta {
                    name: field(name_col),
                    sector: field(sector_col),
                    industry: field(industry_col),
                    active,
                },
            );
        }
        if skipped > 0 {
            warn!(skipped, "Whitelist rows skipped (symbol must be 1-{MAX_SYMBOL_LEN} letters)");
        }
        Ok(Self { entries })
    }

    pub fn get(&self, symbol: &str) -> Option<&TickerMeta> {
        self.entries.get(symbol)
    }

    pub fn is_active(&self, symbol: &str) -> bool {
        self.entries.get(symbol).map_or(false, |m| m.active)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|m| m.active).count()
    }

    /// Entries in symbol order, for syncing into the tickers table.
    pub fn iter_sorted(&self) -> Vec<(&str, &TickerMeta)> {
        let mut v: Vec<_> = self.entries.iter().map(|(k, m)| (k.as_str(), m)).collect();
        v.sort_by(|a, b| a.0.cmp(b.0));
        v
    }
}

/// Common words that are also listed symbols. A bare match is ignored;
/// a `$`-prefixed match still counts.
const DEFAULT_STOPWORDS: &[&str] = &[
    "A", "AI", "ALL", "AM", "AN", "AND", "ANY", "APP", "ARE", "AS", "BE", "BIG", "BILL", "BIT",
    "BRO", "BUY", "BY", "CALL", "CAN", "CARE", "CASH", "CEO", "CFO", "DD", "DAY", "DEEP", "EAT",
    "EDIT", "ELSE", "EVER", "EXP", "F", "FACT", "FAT", "FLOW", "FOR", "FORM", "GAIN", "GOOD",
    "HAS", "HE", "HIT", "HOPE", "I", "IS", "IT", "JOB", "K", "LINE", "LINK", "LOT", "LOVE", "LOW",
    "MAN", "MAX", "MOON", "MOVE", "NET", "NEW", "NEXT", "NICE", "NOT", "NOW", "ON", "ONE", "OP",
    "OPEN", "OR", "OUT", "PAY", "PLAN", "PLAY", "PLUS", "POST", "PUMP", "REAL", "ROOT", "RUN",
    "SAY", "SEE", "SELL", "SO", "T", "THE", "TOP", "TRUE", "TWO", "UP", "USA", "VS", "WAY",
    "WELL", "WTF", "WWW", "YOLO", "YOU",
];

#[derive(Debug)]
pub struct Stoplist {
    words: HashSet<String>,
}

impl Default for Stoplist {
    fn default() -> Self {
        Self::from_words(DEFAULT_STOPWORDS.iter().copied())
    }
}

impl Stoplist {
    pub fn from_words<'a, I: IntoIterator<Item = &'a str>>(words: I) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|w| w.trim().to_ascii_uppercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// One word per line; blank lines and `#` comments ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read stoplist {}: {e}", path.display()))
        })?;
        let list = Self::from_words(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.starts_with('#')),
        );
        info!(words = list.len(), "Stoplist loaded from {}", path.display());
        Ok(list)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }
}

static SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^[A-Z]{{1,{MAX_SYMBOL_LEN}}}$")).expect("valid symbol pattern")
});

pub fn is_valid_symbol(s: &str) -> bool {
    SYMBOL.is_match(s)
}

fn parse_flag(v: &str) -> bool {
    !matches!(
        v.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "n" | "inactive"
    )
}

/// Picks the candidate delimiter that occurs most often in the header line.
fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or("");
    [b',', b';', b'\t', b'|']
        .into_iter()
        .map(|d| (d, header.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, n)| n > 0)
        .max_by_key(|&(_, n)| n)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}
