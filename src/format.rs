//! Human-readable sizes and speeds for reports and logs.

use std::time::Duration;

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * KB;
const GB: f64 = 1024.0 * MB;

/// Format a byte count with a binary-prefixed unit.
pub fn byte_size(size: u64) -> String {
    let size = size as f64;
    if size < KB {
        format!("{size:.0} B")
    } else if size < MB {
        format!("{:.2} KB", size / KB)
    } else if size < GB {
        format!("{:.2} MB", size / MB)
    } else {
        format!("{:.2} GB", size / GB)
    }
}

/// Format `bytes` transferred over `elapsed` as bits per second.
pub fn speed(elapsed: Duration, bytes: u64) -> String {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 {
        (bytes as f64 * 8.0) / secs
    } else {
        0.0
    };

    if speed < KB {
        format!("{speed:.2} Bits/s")
    } else if speed < MB {
        format!("{:.2} KBits/s", speed / KB)
    } else if speed < GB {
        format!("{:.2} MBits/s", speed / MB)
    } else {
        format!("{:.2} GBits/s", speed / GB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let cases = [
            (0, "0 B"),
            (1, "1 B"),
            (1023, "1023 B"),
            (1024, "1.00 KB"),
            (1024 + 120, "1.12 KB"),
            (1024 * 1024, "1.00 MB"),
            (1024 * 1024 + 130 * 1024, "1.13 MB"),
            (1024 * 1024 * 1024, "1.00 GB"),
            (10 * 1024 * 1024 * 1024 + 140 * 1024 * 1024, "10.14 GB"),
        ];
        for (size, want) in cases {
            assert_eq!(byte_size(size), want, "size {size}");
        }
    }

    #[test]
    fn test_speed() {
        let second = Duration::from_secs(1);
        let kb = 1024u64;
        let cases = [
            (Duration::ZERO, 0, "0.00 Bits/s"),
            (Duration::ZERO, 500, "0.00 Bits/s"),
            (second, 21, "168.00 Bits/s"),
            (second, 128, "1.00 KBits/s"),
            (Duration::from_millis(10), 57, "44.53 KBits/s"),
            (second, 105 * kb, "840.00 KBits/s"),
            (second, 106 * kb * kb, "848.00 MBits/s"),
            (second, 107 * kb * kb * kb, "856.00 GBits/s"),
            (Duration::from_secs(4), kb * kb, "2.00 MBits/s"),
        ];
        for (elapsed, bytes, want) in cases {
            assert_eq!(speed(elapsed, bytes), want, "{bytes} bytes in {elapsed:?}");
        }
    }
}
