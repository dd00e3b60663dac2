use std::fmt::{self, Display};

use clap::builder::{NonEmptyStringValueParser, TypedValueParser};

use crate::parsers::simple_error;
use afap::ids::{is_valid_user_id, UserId, MAX_USER_ID, USER_SYSTEM};

/// A package as seen by one user, written `package[@user]` on the command
/// line. The user defaults to the system user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub package: String,
    pub user: UserId,
}

impl PackageRef {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (package, user) = match raw.rsplit_once('@') {
            Some((package, user)) => {
                let user = user
                    .parse::<UserId>()
                    .map_err(|_| format!("invalid user id `{}` in {}", user, raw))?;
                if !is_valid_user_id(user) {
                    return Err(format!(
                        "user id in {} is outside {}..={}",
                        raw, USER_SYSTEM, MAX_USER_ID
                    ));
                }
                (package, user)
            }
            None => (raw, USER_SYSTEM),
        };
        if package.is_empty() {
            return Err(format!("missing package name in {}", raw));
        }
        Ok(Self {
            package: String::from(package),
            user,
        })
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package, self.user)
    }
}

#[derive(Clone)]
pub struct PackageRefValueParser;

impl TypedValueParser for PackageRefValueParser {
    type Value = PackageRef;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let parser = NonEmptyStringValueParser::new();
        let val = parser.parse_ref(cmd, arg, value)?;
        PackageRef::parse(&val).map_err(simple_error)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("com.example.agent", "com.example.agent", 0)]
    #[case("com.example.agent@10", "com.example.agent", 10)]
    #[case("com.example.agent@0", "com.example.agent", 0)]
    #[case("com.example.agent@21473", "com.example.agent", 21473)]
    fn test_parse(#[case] raw: &str, #[case] package: &str, #[case] user: UserId) {
        let parsed = PackageRef::parse(raw).expect("valid ref");
        assert_eq!(parsed.package, package);
        assert_eq!(parsed.user, user);
    }

    #[rstest]
    #[case("@10")]
    #[case("com.example.agent@")]
    #[case("com.example.agent@ten")]
    #[case("com.example.agent@-1")]
    #[case("com.example.agent@21474")]
    fn test_parse_invalid(#[case] raw: &str) {
        assert!(PackageRef::parse(raw).is_err(), "{} should not parse", raw);
    }
}
