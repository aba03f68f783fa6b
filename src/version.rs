use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Format version of a point cloud dataset, `"<major>.<minor>"`.
///
/// Ordering is lexicographic on `(major, minor)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn equal_or_higher(&self, other: impl Into<Version>) -> bool {
        *self >= other.into()
    }

    pub fn newer_than(&self, other: impl Into<Version>) -> bool {
        *self > other.into()
    }

    pub fn up_to(&self, other: impl Into<Version>) -> bool {
        !self.newer_than(other)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let parse = |component: &str| {
            component
                .parse::<u32>()
                .map_err(|_| VersionError::InvalidComponent {
                    input: s.to_string(),
                    component: component.to_string(),
                })
        };

        match s.split_once('.') {
            Some((major, minor)) => Ok(Self::new(parse(major)?, parse(minor)?)),
            // minor defaults to 0
            None => Ok(Self::new(parse(s)?, 0)),
        }
    }
}

impl From<(u32, u32)> for Version {
    fn from((major, minor): (u32, u32)) -> Self {
        Self::new(major, minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parses_major_and_minor() {
        assert_eq!(v("1.5"), Version::new(1, 5));
        assert_eq!(v("2"), Version::new(2, 0));
        assert_eq!(v(" 1.10 "), Version::new(1, 10));
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!("".parse::<Version>(), Err(VersionError::Empty));
        assert!("1.x".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
        assert!("1.2.3".parse::<Version>().is_err());
    }

    #[test]
    fn comparisons() {
        assert!(v("1.5").equal_or_higher(v("1.4")));
        assert!(!v("1.3").equal_or_higher(v("1.4")));
        assert!(v("1.4").equal_or_higher((1, 4)));
        assert!(v("1.4").newer_than((1, 3)));
        assert!(!v("1.3").newer_than((1, 3)));
        assert!(v("1.3").up_to((1, 3)));
        assert!(!v("1.10").up_to((1, 9)));
    }

    proptest! {
        #[test]
        fn equal_or_higher_mirrors_newer_than(a in (0u32..20, 0u32..20), b in (0u32..20, 0u32..20)) {
            let a = Version::from(a);
            let b = Version::from(b);
            prop_assert_eq!(a.equal_or_higher(b), !b.newer_than(a));
        }

        #[test]
        fn display_round_trips(major in 0u32..1000, minor in 0u32..1000) {
            let version = Version::new(major, minor);
            prop_assert_eq!(version.to_string().parse::<Version>().unwrap(), version);
        }
    }
}
