/// Metadata schema version compatibility, relative to what the connected
/// engine version expects (spec §4.5 `state()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCompat {
    FailedSetup,
    FailedUpgrade,
    Nonexisting,
    Upgrading,
    MajorHigher,
    MinorHigher,
    PatchHigher,
    Equal,
    MinorLower,
    MajorLower,
}

impl SchemaCompat {
    /// Compares the Metadata schema's stored `(major, minor, patch)` against
    /// the version this engine build expects.
    pub fn compare(stored: Option<(u32, u32, u32)>, expected: (u32, u32, u32)) -> Self {
        let Some(stored) = stored else {
            return SchemaCompat::Nonexisting;
        };
        use std::cmp::Ordering::*;
        match stored.0.cmp(&expected.0) {
            Greater => SchemaCompat::MajorHigher,
            Less => SchemaCompat::MajorLower,
            Equal => match stored.1.cmp(&expected.1) {
                Greater => SchemaCompat::MinorHigher,
                Less => SchemaCompat::MinorLower,
                Equal => match stored.2.cmp(&expected.2) {
                    Greater => SchemaCompat::PatchHigher,
                    Less | Equal => SchemaCompat::Equal,
                },
            },
        }
    }

    /// Whether a command may proceed given a per-command compatibility
    /// floor (spec §4.5: "commands compare with a per-command compatibility
    /// floor").
    pub fn satisfies_floor(&self, floor: SchemaCompat) -> bool {
        let rank = |c: &SchemaCompat| -> i32 {
            match c {
                SchemaCompat::FailedSetup => -3,
                SchemaCompat::FailedUpgrade => -2,
                SchemaCompat::Nonexisting => -1,
                SchemaCompat::Upgrading => 0,
                SchemaCompat::MajorLower => 1,
                SchemaCompat::MinorLower => 2,
                SchemaCompat::PatchHigher => 3,
                SchemaCompat::Equal => 4,
                SchemaCompat::MinorHigher => 5,
                SchemaCompat::MajorHigher => 6,
            }
        };
        rank(self) >= rank(&floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_is_nonexisting() {
        assert_eq!(SchemaCompat::compare(None, (2, 1, 0)), SchemaCompat::Nonexisting);
    }

    #[test]
    fn equal_versions_compare_equal() {
        assert_eq!(
            SchemaCompat::compare(Some((2, 1, 0)), (2, 1, 0)),
            SchemaCompat::Equal
        );
    }

    #[test]
    fn patch_higher_still_satisfies_equal_floor() {
        let compat = SchemaCompat::compare(Some((2, 1, 3)), (2, 1, 0));
        assert_eq!(compat, SchemaCompat::PatchHigher);
        assert!(compat.satisfies_floor(SchemaCompat::Equal));
    }

    #[test]
    fn major_lower_fails_equal_floor() {
        let compat = SchemaCompat::compare(Some((1, 9, 0)), (2, 1, 0));
        assert_eq!(compat, SchemaCompat::MajorLower);
        assert!(!compat.satisfies_floor(SchemaCompat::Equal));
    }
}
