//! View definition translation.

/// Marker of a remote object reference in the source dialect (`table@link`).
pub const REMOTE_MARKER: &str = "@";

/// Remove every line that references a remote object.
pub fn translate(raw: &str) -> String {
    translate_with(raw, REMOTE_MARKER)
}

/// Remove every line containing `marker`. Other lines, blank ones included,
/// are kept verbatim and in order.
pub fn translate_with(raw: &str, marker: &str) -> String {
    raw.split('\n')
        .filter(|line| !line.contains(marker))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of lines `translate_with` would remove.
pub fn removed_lines(raw: &str, marker: &str) -> usize {
    raw.split('\n').filter(|line| line.contains(marker)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: &str = "SELECT a.id,\n       a.name\n\n  FROM actividades a\n  JOIN clientes@erp_link c ON c.id = a.cliente_id\n WHERE a.estado = 'A'";

    #[test]
    fn test_removes_remote_reference_lines() {
        let out = translate(VIEW);
        assert!(!out.contains('@'));
        assert_eq!(
            out,
            "SELECT a.id,\n       a.name\n\n  FROM actividades a\n WHERE a.estado = 'A'"
        );
    }

    #[test]
    fn test_line_count_drops_by_marker_lines() {
        let raw = "SELECT *\nFROM t@l1\nUNION ALL\nSELECT *\nFROM u@l2";
        let before = raw.split('\n').count();
        let out = translate(raw);
        assert_eq!(removed_lines(raw, REMOTE_MARKER), 2);
        assert_eq!(out.split('\n').count(), before - 2);
    }

    #[test]
    fn test_idempotent() {
        let once = translate(VIEW);
        assert_eq!(translate(&once), once);
    }

    #[test]
    fn test_keeps_blank_lines_and_trailing_newline() {
        let raw = "SELECT 1\n\n\nFROM dual\n";
        assert_eq!(translate(raw), raw);
    }

    #[test]
    fn test_preserves_carriage_returns() {
        let raw = "SELECT 1\r\nFROM x@link\r\nWHERE 1 = 1\r\n";
        assert_eq!(translate(raw), "SELECT 1\r\nWHERE 1 = 1\r\n");
    }

    #[test]
    fn test_custom_marker() {
        let raw = "SELECT *\nFROM [remote].[db].[dbo].[t]\nWHERE 1 = 1";
        assert_eq!(translate_with(raw, "[remote]"), "SELECT *\nWHERE 1 = 1");
    }
}
