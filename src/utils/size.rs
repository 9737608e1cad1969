use std::fmt;

/// Units the size display walks through, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    B,
    Kb,
    Mb,
    Gb,
}

impl SizeUnit {
    /// Next larger unit, `None` at the top of the table.
    pub fn larger(self) -> Option<SizeUnit> {
        match self {
            SizeUnit::B => Some(SizeUnit::Kb),
            SizeUnit::Kb => Some(SizeUnit::Mb),
            SizeUnit::Mb => Some(SizeUnit::Gb),
            SizeUnit::Gb => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            SizeUnit::B => "B",
            SizeUnit::Kb => "KB",
            SizeUnit::Mb => "MB",
            SizeUnit::Gb => "GB",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

const UNIT_SIZE: f64 = 1024.0;
const THRESHOLD: f64 = 500.0;

/// 格式化文件大小
///
/// Moves to the next unit while the value is above 500 and a larger unit exists,
/// then prints `rounding` decimals: `format_size(2_000_000.0, SizeUnit::B, 1)` is
/// `"1.9MB"`, `format_size(400.0, SizeUnit::B, 1)` is `"400.0B"`.
pub fn format_size(size: f64, unit: SizeUnit, rounding: usize) -> String {
    match unit.larger() {
        Some(next) if size > THRESHOLD => format_size(size / UNIT_SIZE, next, rounding),
        _ => format!("{}{}", to_fixed(size, rounding), unit),
    }
}

/// Fixed-point rendering that breaks exact ties upward (0.25 -> "0.3").
fn to_fixed(value: f64, digits: usize) -> String {
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    if scaled.is_finite() && (scaled - scaled.floor()) == 0.5 {
        return format!("{:.*}", digits, scaled.ceil() / factor);
    }
    format!("{:.*}", digits, value)
}
