use std::cmp::Ordering;
use std::collections::HashMap;

/// A parsed `major.minor.patch` server version, used to gate `PERSIST`
/// support (8.0.11+) and `view_change_uuid` support (8.0.27+, spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub fn parse(s: &str) -> Option<Self> {
        // Server version strings look like "8.0.34-log" or "8.4.2"; take the
        // dotted numeric prefix and ignore any suffix.
        let core = s.split(|c: char| !c.is_ascii_digit() && c != '.').next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(ServerVersion { major, minor, patch })
    }

    pub fn at_least(&self, major: u16, minor: u16, patch: u16) -> bool {
        self.cmp(&ServerVersion { major, minor, patch }) != Ordering::Less
    }

    pub fn supports_persist(&self) -> bool {
        self.at_least(8, 0, 11)
    }

    pub fn supports_view_change_uuid(&self) -> bool {
        self.at_least(8, 0, 27)
    }
}

/// The sysvar cache an Instance keeps to avoid round-tripping for values
/// already known from the initial bootstrap query.
#[derive(Debug, Default, Clone)]
pub struct SysvarCache {
    values: HashMap<String, String>,
}

impl SysvarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn invalidate(&mut self, name: &str) {
        self.values.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_versions_with_suffixes() {
        let v = ServerVersion::parse("8.0.34-log").unwrap();
        assert_eq!(v, ServerVersion { major: 8, minor: 0, patch: 34 });
        assert!(v.supports_persist());
        assert!(v.supports_view_change_uuid());
    }

    #[test]
    fn gates_view_change_uuid_below_8_0_27() {
        let v = ServerVersion::parse("8.0.26").unwrap();
        assert!(v.supports_persist());
        assert!(!v.supports_view_change_uuid());
    }

    #[test]
    fn gates_persist_below_8_0_11() {
        let v = ServerVersion::parse("8.0.4").unwrap();
        assert!(!v.supports_persist());
    }
}
