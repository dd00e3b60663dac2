use clap::builder::{NonEmptyStringValueParser, TypedValueParser};

use crate::parsers::simple_error;
use afap::AccessFlags;

#[derive(Clone)]
pub struct AccessFlagsValueParser;

impl TypedValueParser for AccessFlagsValueParser {
    type Value = AccessFlags;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let parser = NonEmptyStringValueParser::new();
        let val = parser.parse_ref(cmd, arg, value)?;
        val.parse::<AccessFlags>().map_err(simple_error)
    }
}
