//! Helper functions for [`toml_span`].

use std::borrow::Cow;

use toml_span::DeserError;

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<T>(toml_str: &str) -> Result<T, DeserError>
where
    T: for<'de> toml_span::Deserialize<'de>,
{
    let mut value = toml_span::de::parse(toml_str)?;
    T::deserialize(&mut value)
}

/// Create a custom [`DeserError`] with a span.
pub fn custom_deser_error(
    span: toml_span::Span,
    msg: impl Into<Cow<'static, str>>,
) -> DeserError {
    let err_kind = toml_span::ErrorKind::Custom(msg.into());
    let err = toml_span::Error::from((err_kind, span));
    DeserError::from(err)
}

/// Summarize a [`DeserError`] as a single human-readable message, with line
/// numbers computed from `source`.
pub fn describe_deser_error(source: &str, err: &DeserError) -> String {
    err.errors
        .iter()
        .map(|err| {
            let line = source[..err.span.start.min(source.len())]
                .matches('\n')
                .count()
                + 1;
            format!("line {line}: {err}")
        })
        .collect::<Vec<_>>()
        .join("; ")
}
