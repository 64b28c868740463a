// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RFC 3339 timestamps as used in XMPP (XEP-0082).

use core::fmt;
use core::str::FromStr;
use std::borrow::Cow;

use chrono::{SecondsFormat, Utc};
use xso::{error::Error, AsXmlText, FromXmlText};

/// An RFC 3339 timestamp.
///
/// Parsing accepts any offset; the value is normalised to UTC and always
/// serialises with the `Z` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub chrono::DateTime<Utc>);

impl FromStr for DateTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<DateTime, Self::Err> {
        let parsed = chrono::DateTime::parse_from_rfc3339(s)?;
        Ok(DateTime(parsed.with_timezone(&Utc)))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl FromXmlText for DateTime {
    fn from_xml_text(s: String) -> Result<DateTime, Error> {
        s.parse().map_err(Error::text_parse_error)
    }
}

impl AsXmlText for DateTime {
    fn as_xml_text(&self) -> Result<Cow<'_, str>, Error> {
        Ok(Cow::Owned(self.to_string()))
    }
}
