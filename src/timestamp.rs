/// Formats a microsecond timestamp as `hh:mm:ss.mmm`, truncating to the
/// millisecond. Negative times get a leading `-`.
pub fn time_str(time_us: i64) -> String {
    let sign = if time_us < 0 { "-" } else { "" };
    let ms = time_us.unsigned_abs() / 1000;
    let hours = ms / 3_600_000;
    let minutes = ms % 3_600_000 / 60_000;
    let seconds = ms % 60_000 / 1000;
    let milliseconds = ms % 1000;

    format!(
        "{sign}{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_microseconds() {
        assert_eq!(time_str(0), "00:00:00.000");
        assert_eq!(time_str(5_000_999), "00:00:05.000");
        assert_eq!(time_str(3_723_456_000), "01:02:03.456");
        assert_eq!(time_str(-1_500_000), "-00:00:01.500");
        assert_eq!(time_str(360_000_000_000), "100:00:00.000");
    }
}
