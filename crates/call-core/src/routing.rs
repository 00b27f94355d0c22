//! The route table: ordered pattern-matching rules that resolve destination
//! addresses to protocol-qualified ones.
//!
//! Each rule is `pattern=destination`. The pattern is compiled to an
//! anchored regular expression and matched against `protocol:address`
//! search keys in insertion order; the first match wins. A pattern with no
//! colon applies to the address part alone (any protocol). Destinations
//! may carry macros (`<da>`, `<dn>`, `<!dn>`, `<dn2ip>`) expanded from the
//! matched address. Rule files can be included with `@path`, one rule per
//! line, `#` for comments.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::errors::{EngineError, Result};

/// Characters that make up the "dialed number" run of an address.
const DIAL_DIGITS: &str = "0123456789*#";

/// One route rule. Immutable once constructed; construction fails if the
/// pattern does not compile.
pub struct RouteEntry {
    pattern: String,
    destination: String,
    regex: Regex,
}

impl RouteEntry {
    pub fn new(pattern: &str, destination: &str) -> Result<Self> {
        // A pattern without a protocol part matches the address under any
        // protocol.
        let anchored = if pattern.contains(':') {
            format!("^{pattern}$")
        } else {
            format!("^[^:]*:{pattern}$")
        };
        let regex = Regex::new(&anchored).map_err(|e| EngineError::InvalidRoute {
            spec: format!("{pattern}={destination}"),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            destination: destination.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_match(&self, search: &str) -> bool {
        self.regex.is_match(search)
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.pattern, self.destination)
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteEntry({self})")
    }
}

/// Ordered, first-match-wins route table.
pub struct RouteTable {
    entries: RwLock<Vec<Arc<RouteEntry>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Parse one rule spec and append it.
    ///
    /// Returns `Ok(true)` when a rule was added, `Ok(false)` for comments
    /// and blank lines, and an error for malformed specs, bad patterns, or
    /// unreadable include files. A rejected spec leaves the table
    /// unchanged.
    pub fn add_rule(&self, spec: &str) -> Result<bool> {
        let spec = spec.trim();
        if spec.is_empty() || spec.starts_with('#') {
            return Ok(false);
        }

        if let Some(path) = spec.strip_prefix('@') {
            let contents =
                std::fs::read_to_string(path).map_err(|e| EngineError::RouteFile {
                    path: path.to_string(),
                    source: e,
                })?;
            debug!("adding routes from file \"{}\"", path);
            let mut any = false;
            for line in contents.lines() {
                if self.add_rule(line)? {
                    any = true;
                }
            }
            return Ok(any);
        }

        let Some((pattern, destination)) = spec.split_once('=') else {
            return Err(EngineError::InvalidRoute {
                spec: spec.to_string(),
                reason: "missing '='".to_string(),
            });
        };

        let entry = RouteEntry::new(pattern.trim(), destination.trim())?;
        debug!("added route \"{}\"", entry);
        self.entries.write().push(Arc::new(entry));
        Ok(true)
    }

    /// Replace the whole table with the given rule specs.
    ///
    /// Bad specs are logged and skipped, matching how rule files tolerate
    /// stray lines. Returns whether at least one rule was accepted.
    pub fn set_rules<S: AsRef<str>>(&self, specs: &[S]) -> bool {
        self.entries.write().clear();

        let mut any = false;
        for spec in specs {
            match self.add_rule(spec.as_ref()) {
                Ok(true) => any = true,
                Ok(false) => {}
                Err(e) => warn!("rejected route entry: {}", e),
            }
        }
        any
    }

    /// Match `protocol:address` against the table and expand the winning
    /// destination. `None` when nothing matches.
    pub fn apply(&self, protocol: &str, address: &str) -> Option<String> {
        let search = format!("{protocol}:{address}");
        trace!("searching for route \"{}\"", search);

        let destination = self
            .entries
            .read()
            .iter()
            .find(|e| e.is_match(&search))
            .map(|e| e.destination().to_string())?;

        Some(expand_destination(&destination, address))
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Snapshot of the table, in insertion order.
    pub fn entries(&self) -> Vec<Arc<RouteEntry>> {
        self.entries.read().clone()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand destination macros against the matched address.
///
/// Fixed order, one substitution each (the first occurrence found):
/// `<da>` the full address, `<dn>` its leading dial-digit run, `<!dn>`
/// the remainder after that run, `<dn2ip>` the address re-read as a
/// `*`-separated host spec.
fn expand_destination(destination: &str, address: &str) -> String {
    let mut out = destination.replacen("<da>", address, 1);

    let digits_end = address
        .find(|c: char| !DIAL_DIGITS.contains(c))
        .unwrap_or(address.len());

    out = out.replacen("<dn>", &address[..digits_end], 1);
    out = out.replacen("<!dn>", &address[digits_end..], 1);

    if out.contains("<dn2ip>") {
        let stars: Vec<&str> = address.split('*').collect();
        let host = match stars.len() {
            0..=3 => address.to_string(),
            4 => format!("{}.{}.{}.{}", stars[0], stars[1], stars[2], stars[3]),
            5 => format!(
                "{}@{}.{}.{}.{}",
                stars[0], stars[1], stars[2], stars[3], stars[4]
            ),
            _ => format!(
                "{}@{}.{}.{}.{}:{}",
                stars[0], stars[1], stars[2], stars[3], stars[4], stars[5]
            ),
        };
        out = out.replacen("<dn2ip>", &host, 1);
    }

    out
}
