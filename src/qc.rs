use std::path::Path;

use crate::error::{MbatError, Result};

/// `flag` names the option the path came from.
pub fn check_input_file(path: &Path, flag: &str) -> Result<()> {
    if !path.is_file() {
        return Err(MbatError::InvalidArgument(format!(
            "--{flag}: {} is not a readable file",
            path.display()
        )));
    }
    Ok(())
}

/// Checks `min <= value <= max`, or `min < value < max` when `exclusive`.
pub fn check_range_f64(value: f64, min: f64, max: f64, exclusive: bool, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(MbatError::InvalidArgument(format!(
            "Value of {name} should be finite"
        )));
    }
    let below = if exclusive { value <= min } else { value < min };
    let above = if exclusive { value >= max } else { value > max };
    if below {
        return Err(MbatError::InvalidArgument(format!(
            "Value of {name} should be above {min}"
        )));
    }
    if above {
        return Err(MbatError::InvalidArgument(format!(
            "Value of {name} should be below {max}"
        )));
    }
    Ok(())
}

pub fn check_positive(value: f64, name: &str) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(MbatError::InvalidArgument(format!(
            "{name} should be a positive number, got {value}"
        )));
    }
    Ok(())
}
