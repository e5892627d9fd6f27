use crate::{Error, Result};

/// Validate a unit name and canonicalize shorthands (`"web"` becomes `"web.service"`).
///
/// The name ends up as a path component of the drop-in directory, so separators and `..` are
/// rejected.
pub(crate) fn canonicalize_unit_name(input: &str) -> Result<String> {
    validate_no_control("unit", input)?;
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_input("unit must not be empty"));
    }
    if input.contains('/') || input.contains('\\') {
        return Err(Error::invalid_input(
            "unit must not contain path separators",
        ));
    }
    if input.contains("..") {
        return Err(Error::invalid_input("unit must not contain '..'"));
    }

    if input.contains('.') {
        return Ok(input.to_string());
    }
    Ok(format!("{input}.service"))
}

pub(crate) fn validate_dropin_name(input: &str) -> Result<()> {
    validate_no_control("drop-in name", input)?;
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_input("drop-in name must not be empty"));
    }
    if input.contains('/') || input.contains('\\') || input.contains("..") {
        return Err(Error::invalid_input(
            "drop-in name must be a single path component",
        ));
    }
    if input.ends_with(".conf") {
        return Err(Error::invalid_input(
            "drop-in name must not include the .conf suffix",
        ));
    }
    Ok(())
}

pub(crate) fn validate_no_control(context: &str, input: &str) -> Result<()> {
    if input.contains('\0') {
        return Err(Error::invalid_input(format!(
            "{context} must not contain NUL"
        )));
    }
    if input.contains('\n') || input.contains('\r') {
        return Err(Error::invalid_input(format!(
            "{context} must not contain newlines"
        )));
    }
    if input.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_input(format!(
            "{context} must not contain control characters"
        )));
    }
    Ok(())
}
