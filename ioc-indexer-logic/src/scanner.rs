use std::{
    io::{self, BufRead, BufReader},
    net::Ipv4Addr,
    path::Path,
};

use ipnet::Ipv4Net;
use regex::Regex;

use crate::{
    metrics,
    types::{IndicatorHit, IndicatorType},
};

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Pattern set compiled once at boot from the configured suffix and CIDR
/// lists. Suffix matching is case-insensitive; candidate tokens must parse
/// as the syntactic shape of their indicator class before a suffix is even
/// consulted.
#[derive(Debug, Clone)]
pub struct IocPatterns {
    domain_suffixes: Vec<String>,
    email_suffixes: Vec<String>,
    cidrs: Vec<Ipv4Net>,
    hostname_token: Regex,
    email_token: Regex,
    ipv4_token: Regex,
}

impl IocPatterns {
    pub fn compile(domains: &[String], emails: &[String], cidrs: &[Ipv4Net]) -> Self {
        Self {
            domain_suffixes: domains.iter().map(|s| s.to_ascii_lowercase()).collect(),
            email_suffixes: emails.iter().map(|s| s.to_ascii_lowercase()).collect(),
            cidrs: cidrs.to_vec(),
            hostname_token: Regex::new(
                r"(?i)\b[a-z0-9][a-z0-9-]{0,62}(?:\.[a-z0-9][a-z0-9-]{0,62})+\b",
            )
            .expect("hostname token pattern is valid"),
            email_token: Regex::new(
                r"(?i)\b[a-z0-9._%+-]+@[a-z0-9][a-z0-9.-]*\.[a-z]{2,}\b",
            )
            .expect("email token pattern is valid"),
            ipv4_token: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b")
                .expect("ipv4 token pattern is valid"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub hits: Vec<IndicatorHit>,
    pub truncated_lines: u64,
}

/// Line-oriented indicator matcher. Pure with respect to persistence: it
/// only reads files and returns hits with their provenance.
#[derive(Debug, Clone)]
pub struct Scanner {
    patterns: IocPatterns,
    max_line_bytes: usize,
}

impl Scanner {
    pub fn new(patterns: IocPatterns) -> Self {
        Self {
            patterns,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    #[cfg(test)]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Only plain-text members are scanned.
    pub fn is_scannable(member_name: &str) -> bool {
        member_name.to_ascii_lowercase().ends_with(".txt")
    }

    pub fn scan_file(&self, relative_path: &str, path: &Path) -> io::Result<ScanOutcome> {
        let file = std::fs::File::open(path)?;
        self.scan_reader(relative_path, BufReader::new(file))
    }

    pub fn scan_reader<R: BufRead>(
        &self,
        relative_path: &str,
        mut reader: R,
    ) -> io::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut buffer = Vec::with_capacity(4096);
        let mut line_number = 0i32;
        loop {
            buffer.clear();
            let (read, truncated) =
                read_line_capped(&mut reader, &mut buffer, self.max_line_bytes)?;
            if read == 0 {
                break;
            }
            line_number += 1;
            if truncated {
                outcome.truncated_lines += 1;
                metrics::SCAN_LINES_TRUNCATED.inc();
            }
            // invalid bytes never fail the scan
            let line = String::from_utf8_lossy(&buffer);
            self.scan_line(&line, relative_path, line_number, &mut outcome.hits);
        }
        Ok(outcome)
    }

    fn scan_line(
        &self,
        line: &str,
        relative_path: &str,
        line_number: i32,
        hits: &mut Vec<IndicatorHit>,
    ) {
        for token in self.patterns.hostname_token.find_iter(line) {
            let value = token.as_str().to_ascii_lowercase();
            if self
                .patterns
                .domain_suffixes
                .iter()
                .any(|suffix| value.contains(suffix))
            {
                hits.push(IndicatorHit {
                    indicator_type: IndicatorType::Domain,
                    value,
                    source_relative_path: relative_path.to_string(),
                    source_line: line_number,
                });
            }
        }
        for token in self.patterns.email_token.find_iter(line) {
            let value = token.as_str().to_ascii_lowercase();
            if self
                .patterns
                .email_suffixes
                .iter()
                .any(|suffix| value.contains(suffix))
            {
                hits.push(IndicatorHit {
                    indicator_type: IndicatorType::Email,
                    value,
                    source_relative_path: relative_path.to_string(),
                    source_line: line_number,
                });
            }
        }
        for token in self.patterns.ipv4_token.find_iter(line) {
            let Ok(address) = token.as_str().parse::<Ipv4Addr>() else {
                continue;
            };
            if self.patterns.cidrs.iter().any(|net| net.contains(&address)) {
                hits.push(IndicatorHit {
                    indicator_type: IndicatorType::Ipv4,
                    value: address.to_string(),
                    source_relative_path: relative_path.to_string(),
                    source_line: line_number,
                });
            }
        }
    }
}

/// Reads one line (up to and excluding the newline) into `buffer`, keeping
/// at most `cap` bytes and draining the remainder. Returns the number of
/// bytes consumed from the reader and whether the line was truncated.
fn read_line_capped<R: BufRead>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    cap: usize,
) -> io::Result<(usize, bool)> {
    let mut consumed_total = 0usize;
    let mut truncated = false;
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok((consumed_total, truncated));
        }
        let (chunk, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(at) => (&available[..at], true),
            None => (available, false),
        };
        let keep = cap.saturating_sub(buffer.len()).min(chunk.len());
        buffer.extend_from_slice(&chunk[..keep]);
        if keep < chunk.len() {
            truncated = true;
        }
        let consume = chunk.len() + usize::from(found_newline);
        reader.consume(consume);
        consumed_total += consume;
        if found_newline {
            return Ok((consumed_total, truncated));
        }
    }
}
