#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::io::{BufRead, Write};

use biometrics::Counter;

///////////////////////////////////////////// constants ////////////////////////////////////////////

/// Variable names longer than this many bytes are truncated during normalization.
pub const MAX_VARIABLE_LENGTH: usize = 4096;

///////////////////////////////////////////// counters /////////////////////////////////////////////

static MALFORMED_SPECIFIER: Counter = Counter::new("envsubst.allow_list.malformed_specifier");
static TRUNCATED_NAME: Counter = Counter::new("envsubst.normalize.truncated");
static MALFORMED_REFERENCE: Counter = Counter::new("envsubst.expand.malformed_reference");
static UNDEFINED_VARIABLE: Counter = Counter::new("envsubst.expand.undefined_variable");
static RESTRICTED_PASSTHROUGH: Counter = Counter::new("envsubst.expand.restricted_passthrough");

/// Register all envsubst counters with the provided collector.
pub fn register_counters(collector: &biometrics::Collector) {
    collector.register_counter(&MALFORMED_SPECIFIER);
    collector.register_counter(&TRUNCATED_NAME);
    collector.register_counter(&MALFORMED_REFERENCE);
    collector.register_counter(&UNDEFINED_VARIABLE);
    collector.register_counter(&RESTRICTED_PASSTHROUGH);
}

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// The Error type.
#[derive(Debug)]
pub enum Error {
    /// An allow-list dump was requested, but the allow-list is empty.
    NoVariablesDefined,
    /// An error from the standard library while reading or writing a stream.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoVariablesDefined => write!(f, "no variables defined"),
            Error::IoError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::NoVariablesDefined => None,
            Error::IoError(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

/////////////////////////////////////////// normalization //////////////////////////////////////////

/// Normalize a variable reference to the bare variable name.
///
/// A leading `$` is stripped, as is a `{` immediately following it.  The result is truncated at
/// the first `}`, if any; an unmatched `{` is tolerated and the remainder is taken as-is.  When
/// `require_sigil` is true, input without a leading `$` is rejected; scanning free text uses this
/// mode so that bare words are never treated as variable references.
///
/// The returned name is a fresh allocation owned by the caller and may be empty.  Names longer
/// than [MAX_VARIABLE_LENGTH] bytes are truncated on a character boundary.
pub fn normalize_variable(raw: &str, require_sigil: bool) -> Option<String> {
    let var = if let Some(stripped) = raw.strip_prefix('$') {
        stripped.strip_prefix('{').unwrap_or(stripped)
    } else if require_sigil {
        return None;
    } else {
        raw
    };
    let mut name = match var.find('}') {
        Some(brace) => &var[..brace],
        None => var,
    };
    if name.len() > MAX_VARIABLE_LENGTH {
        let mut cut = MAX_VARIABLE_LENGTH;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name = &name[..cut];
        TRUNCATED_NAME.click();
    }
    Some(name.to_string())
}

///////////////////////////////////////// VariableProvider /////////////////////////////////////////

/// A VariableProvider provides a way to lookup the value of a variable.
///
/// It is expected that the provider do no expansion of its own.
pub trait VariableProvider {
    /// Lookup the value of `ident`.
    fn lookup(&self, ident: &str) -> Option<String>;
}

impl VariableProvider for () {
    fn lookup(&self, _: &str) -> Option<String> {
        None
    }
}

impl<K: Borrow<str> + Eq + Hash, V: AsRef<str>> VariableProvider for HashMap<K, V> {
    fn lookup(&self, ident: &str) -> Option<String> {
        self.get(ident).map(|v| v.as_ref().to_string())
    }
}

/// A provider that looks values up in the process environment.
///
/// Lookups query the live environment on every call; values changed between lookups are observed.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvironmentVariableProvider;

impl EnvironmentVariableProvider {
    /// Create a new environment variable provider.
    pub const fn new() -> Self {
        Self
    }
}

/// Check that a name satisfies the preconditions of `std::env::var`, which panics on names that
/// are empty or contain an ASCII equals sign or NUL.
fn is_safe_env_var_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('=') && !name.contains('\0')
}

impl VariableProvider for EnvironmentVariableProvider {
    fn lookup(&self, ident: &str) -> Option<String> {
        if !is_safe_env_var_name(ident) {
            return None;
        }
        std::env::var(ident).ok()
    }
}

///////////////////////////////////////////// AllowList ////////////////////////////////////////////

/// An ordered list of variable names permitted to be substituted.
///
/// Insertion order is command-line order and duplicates are kept.  An empty list is the
/// distinguished *unrestricted* state:  every variable is allowed.  Build the list once at
/// startup and pass it by reference into [expand_stream]; it is never mutated during
/// substitution.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    names: Vec<String>,
}

impl AllowList {
    /// Create a new, empty (unrestricted) allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no names have been added.  An empty list allows every variable, but cannot be
    /// dumped; see [AllowList::dump].
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The number of names added, duplicates included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// The names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Normalize a single specifier and append it.  Bare names are accepted; `$NAME` and
    /// `${NAME}` shell forms are tolerated and stripped.  Returns false if the specifier cannot
    /// be normalized; the caller reports and continues.
    pub fn push_specifier(&mut self, spec: &str) -> bool {
        match normalize_variable(spec, false) {
            Some(name) => {
                self.names.push(name);
                true
            }
            None => {
                MALFORMED_SPECIFIER.click();
                false
            }
        }
    }

    /// Split a command-line argument on `,` and append each specifier.  Empty sub-tokens are
    /// skipped.  Returns the sub-tokens that failed to normalize, for the caller to report.
    /// Repeated calls accumulate into one list.
    pub fn extend_from_argument(&mut self, arg: &str) -> Vec<String> {
        let mut rejected = Vec::new();
        for spec in arg.split(',') {
            if spec.is_empty() {
                continue;
            }
            if !self.push_specifier(spec) {
                rejected.push(spec.to_string());
            }
        }
        rejected
    }

    /// True iff `name` may be substituted:  the list is empty (unrestricted) or `name` is a
    /// member.  Membership is case-sensitive exact match.
    pub fn allows(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }

    /// Write the names to `output`, one per line, in insertion order.
    ///
    /// Dumping an empty list is an error.  Note the asymmetry with [AllowList::allows]:  an empty
    /// list means "unrestricted" when filtering and "nothing to dump" here.
    pub fn dump(&self, output: &mut dyn Write) -> Result<(), Error> {
        if self.names.is_empty() {
            return Err(Error::NoVariablesDefined);
        }
        for name in &self.names {
            writeln!(output, "{}", name)?;
        }
        Ok(())
    }
}

///////////////////////////////////////////// expansion ////////////////////////////////////////////

/// The whitespace bytes that terminate a variable reference token.
fn is_token_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Resolve one raw token (the bytes from `$` up to the terminating whitespace) and write its
/// substitution to `output`.
///
/// Tokens that are not valid UTF-8 or normalize to an empty name are malformed references and
/// pass through verbatim.  Allowed names that are not provided by `vars` expand to nothing.
/// Names excluded by a non-empty allow-list pass through verbatim.
fn write_token<W: Write + ?Sized, P: VariableProvider + ?Sized>(
    raw: &[u8],
    output: &mut W,
    allow_list: &AllowList,
    vars: &P,
) -> Result<(), Error> {
    let normalized = std::str::from_utf8(raw)
        .ok()
        .and_then(|token| normalize_variable(token, true));
    let name = match normalized {
        Some(name) if !name.is_empty() => name,
        _ => {
            MALFORMED_REFERENCE.click();
            output.write_all(raw)?;
            return Ok(());
        }
    };
    if allow_list.allows(&name) {
        match vars.lookup(&name) {
            Some(value) => output.write_all(value.as_bytes())?,
            None => UNDEFINED_VARIABLE.click(),
        }
    } else {
        RESTRICTED_PASSTHROUGH.click();
        output.write_all(raw)?;
    }
    Ok(())
}

/// Expand the variable references in one line of input.
///
/// Every byte that is not part of a `$` token is copied through unchanged.  A token runs from
/// `$` up to the next ASCII space, tab, CR, or LF, or the end of the line; the terminating
/// whitespace byte is not part of the token and is copied as literal text.  Each `$` starts
/// token recognition independently; there is no escape for a literal `$`.
pub fn expand_line<W: Write + ?Sized, P: VariableProvider + ?Sized>(
    line: &[u8],
    output: &mut W,
    allow_list: &AllowList,
    vars: &P,
) -> Result<(), Error> {
    let mut start = 0;
    while start < line.len() {
        let dollar = match line[start..].iter().position(|&b| b == b'$') {
            Some(offset) => start + offset,
            None => {
                output.write_all(&line[start..])?;
                break;
            }
        };
        output.write_all(&line[start..dollar])?;
        let end = line[dollar..]
            .iter()
            .position(|&b| is_token_whitespace(b))
            .map(|offset| dollar + offset)
            .unwrap_or(line.len());
        write_token(&line[dollar..end], output, allow_list, vars)?;
        start = end;
    }
    Ok(())
}

/// Expand `input` to `output`, substituting variable references from `vars` filtered by
/// `allow_list`.
///
/// Input is consumed one line at a time (a line is terminated by `\n` or end of stream; there is
/// no line-length limit) and output is written incrementally, so arbitrarily large streams are
/// processed in bounded memory.  Substitution is strictly sequential; the allow-list is
/// read-only for the duration.
pub fn expand_stream<R: BufRead + ?Sized, W: Write + ?Sized, P: VariableProvider + ?Sized>(
    input: &mut R,
    output: &mut W,
    allow_list: &AllowList,
    vars: &P,
) -> Result<(), Error> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        expand_line(&line, output, allow_list, vars)?;
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
