use anyhow::Error;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A string with at most `N` characters, trimmed of surrounding whitespace.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct StringMaxChars<const N: usize>(String);

impl<const N: usize> From<StringMaxChars<N>> for String {
    fn from(string: StringMaxChars<N>) -> String {
        return string.0;
    }
}

impl<const N: usize> std::convert::TryFrom<String> for StringMaxChars<N> {
    type Error = Error;
    fn try_from(string: String) -> Result<Self, Self::Error> {
        let string = string.trim();
        if string.is_empty() {
            Err(Error::msg("string is empty"))?
        }
        if string.chars().count() > N {
            Err(Error::msg(format!(
                "string has too many characters (max {})",
                N
            )))?
        }
        Ok(StringMaxChars(string.to_string()))
    }
}

impl<'a, const N: usize> std::convert::TryFrom<&'a str> for StringMaxChars<N> {
    type Error = Error;
    fn try_from(string: &'a str) -> Result<Self, Self::Error> {
        StringMaxChars::try_from(string.to_string())
    }
}

impl<const N: usize> std::ops::Deref for StringMaxChars<N> {
    type Target = String;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> AsRef<str> for StringMaxChars<N> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> std::fmt::Display for StringMaxChars<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request, announcement and event titles.
pub type Title = StringMaxChars<100>;

/// Free text bodies, bounded by the platform message length.
pub type Body = StringMaxChars<2000>;

/// Zone descriptions end up as channel topics.
pub type Description = StringMaxChars<1024>;

lazy_static! {
    static ref ZONE_NAME: Regex = Regex::new(r"^[\p{L}\p{N}][\p{L}\p{N} _-]{1,31}$").unwrap();
}

/// The name of a zone or temp group: 2 to 32 characters, starting with a
/// letter or digit, then letters, digits, spaces, `-` and `_`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct ZoneName(String);

impl ZoneName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for uniqueness checks.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }

    /// Form usable as a text channel name: lowercase with runs of spaces
    /// replaced by `-`.
    pub fn slug(&self) -> String {
        self.0
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl From<ZoneName> for String {
    fn from(name: ZoneName) -> String {
        name.0
    }
}

impl std::convert::TryFrom<String> for ZoneName {
    type Error = Error;
    fn try_from(name: String) -> Result<Self, Self::Error> {
        let name = name.trim();
        if !ZONE_NAME.is_match(name) {
            Err(Error::msg(
                "name must be 2 to 32 letters, digits, spaces, `-` or `_`",
            ))?
        }
        Ok(ZoneName(name.to_string()))
    }
}

impl<'a> std::convert::TryFrom<&'a str> for ZoneName {
    type Error = Error;
    fn try_from(name: &'a str) -> Result<Self, Self::Error> {
        ZoneName::try_from(name.to_string())
    }
}

impl std::fmt::Display for ZoneName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_from_string() {
        StringMaxChars::<3>::try_from("abc".to_string()).unwrap();
        StringMaxChars::<3>::try_from("a").unwrap();
        // counts characters not bytes
        StringMaxChars::<3>::try_from("ééé").unwrap();
    }

    #[test]
    fn trims_whitespace() {
        let string = StringMaxChars::<3>::try_from("  abc \n").unwrap();
        assert_eq!(string.as_str(), "abc");
    }

    #[test]
    fn doesnt_build_too_long_or_empty() {
        StringMaxChars::<3>::try_from("abcd").unwrap_err();
        StringMaxChars::<3>::try_from("   ").unwrap_err();
    }

    #[test]
    fn doesnt_deserialize_invalid() {
        serde_json::from_str::<StringMaxChars<3>>("\"abcd\"").unwrap_err();
        let string: StringMaxChars<3> = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(string.as_ref(), "abc");
    }

    #[test]
    fn validates_zone_names() {
        ZoneName::try_from("Book Club").unwrap();
        ZoneName::try_from("rust_fans-2").unwrap();
        ZoneName::try_from("Café").unwrap();
        ZoneName::try_from("a").unwrap_err();
        ZoneName::try_from("-abc").unwrap_err();
        ZoneName::try_from("abc!").unwrap_err();
        ZoneName::try_from("a".repeat(33)).unwrap_err();
        ZoneName::try_from("a".repeat(32)).unwrap();
    }

    #[test]
    fn builds_zone_name_key_and_slug() {
        let name = ZoneName::try_from("  Book   Club ").unwrap();
        assert_eq!(name.as_str(), "Book   Club");
        assert_eq!(name.key(), "book   club");
        assert_eq!(name.slug(), "book-club");
    }
}
