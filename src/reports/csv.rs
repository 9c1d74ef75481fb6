//! CSV export for planner reports

use super::trends::RegionDailyTotal;

pub const REPORT_HEADER: [&str; 3] = ["region", "day", "total_visitors"];

/// Render per-region daily totals as CSV with a header row
pub fn render_region_daily(rows: &[RegionDailyTotal]) -> String {
    let mut out = String::new();
    write_record(&mut out, REPORT_HEADER.iter().copied());

    for row in rows {
        let total = row.total_visitors.to_string();
        write_record(
            &mut out,
            [row.region.as_str(), row.day.as_str(), total.as_str()].into_iter(),
        );
    }

    out
}

fn write_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str("\r\n");
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(region: &str, day: &str, total: i64) -> RegionDailyTotal {
        RegionDailyTotal {
            region: region.to_string(),
            day: day.to_string(),
            total_visitors: total,
        }
    }

    #[test]
    fn test_header_only_when_empty() {
        assert_eq!(render_region_daily(&[]), "region,day,total_visitors\r\n");
    }

    #[test]
    fn test_rows_rendered_in_order() {
        let csv = render_region_daily(&[
            row("Wellington", "2024-03-01", 120),
            row("Wellington", "2024-03-02", 95),
        ]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Wellington,2024-03-01,120");
        assert_eq!(lines[2], "Wellington,2024-03-02,95");
    }

    #[test]
    fn test_fields_quoted_when_needed() {
        let csv = render_region_daily(&[row("Bay of \"Islands\", North", "2024-03-01", 5)]);
        assert!(csv.contains("\"Bay of \"\"Islands\"\", North\",2024-03-01,5"));
    }
}
