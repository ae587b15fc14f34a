//! Identifier normalization
//!
//! Thin wrappers over the stringprep profiles and IDNA ToASCII, applied
//! to identifiers before they are used on the wire or in DNS queries.

use core::fmt;
use core::ops::Deref;
use std::error::Error as StdError;

/// Which preparation to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationKind {
    /// Nodeprep profile, for the local part of a JID
    Nodeprep,
    /// Nameprep profile, for the domain part of a JID
    Nameprep,
    /// Resourceprep profile, for the resource part of a JID
    Resourceprep,
    /// SASLprep profile, for user names and passwords
    Saslprep,
    /// IDNA ToASCII, for domain names used in DNS lookups
    IdnaToAscii,
}

impl fmt::Display for NormalizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NormalizationKind::Nodeprep => "nodeprep",
            NormalizationKind::Nameprep => "nameprep",
            NormalizationKind::Resourceprep => "resourceprep",
            NormalizationKind::Saslprep => "saslprep",
            NormalizationKind::IdnaToAscii => "ToASCII",
        })
    }
}

/// A string that went through [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedString(String);

impl NormalizedString {
    /// Borrow the prepared string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take ownership of the prepared string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for NormalizedString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A string was rejected by a stringprep profile or by IDNA conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationError {
    /// The profile or operation that failed.
    pub kind: NormalizationKind,
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed on {:?}", self.kind, self.input)
    }
}

impl StdError for NormalizationError {}

/// Prepare `input` according to `kind`.
pub fn normalize(
    kind: NormalizationKind,
    input: &str,
) -> Result<NormalizedString, NormalizationError> {
    let error = || NormalizationError {
        kind,
        input: input.to_owned(),
    };
    let prepared = match kind {
        NormalizationKind::Nodeprep => stringprep::nodeprep(input)
            .map_err(|_| error())?
            .into_owned(),
        NormalizationKind::Nameprep => stringprep::nameprep(input)
            .map_err(|_| error())?
            .into_owned(),
        NormalizationKind::Resourceprep => stringprep::resourceprep(input)
            .map_err(|_| error())?
            .into_owned(),
        NormalizationKind::Saslprep => stringprep::saslprep(input)
            .map_err(|_| error())?
            .into_owned(),
        NormalizationKind::IdnaToAscii => {
            let ascii = idna::domain_to_ascii(input).map_err(|_| error())?;
            if ascii.is_empty() {
                return Err(error());
            }
            ascii
        }
    };
    Ok(NormalizedString(prepared))
}
