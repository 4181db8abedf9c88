//! Filename sanitizer applied to every provider-supplied title before it is
//! used as an on-disk name or ZIP label.

/// Characters never allowed in a stored filename, path separators included.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\''];

const MAX_LEN: usize = 150;

/// Replaces forbidden characters with `_`, truncates to 150 characters and
/// trims surrounding whitespace. Idempotent, so titles that already went
/// through a round trip are left alone.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    let truncated: String = replaced.chars().take(MAX_LEN).collect();
    truncated.trim().to_string()
}

/// Clamps a message to `max` characters. Used for the error excerpts stored
/// in batch results and surfaced from ffmpeg.
pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_forbidden_character() {
        let out = sanitize_filename("a<b>c:d\"e/f\\g|h?i*j'k");
        for c in FORBIDDEN {
            assert!(!out.contains(*c), "found {:?} in {:?}", c, out);
        }
        assert_eq!(out, "a_b_c_d_e_f_g_h_i_j_k");
    }

    #[test]
    fn truncates_to_150_characters() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_filename(&long).chars().count(), 150);
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(sanitize_filename("  My Song  "), "My Song");
    }

    #[test]
    fn is_idempotent() {
        for input in ["a/b\\c", "  weird: title? ", "plain", &"é".repeat(200)] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééééé", 3), "ééé");
        assert_eq!(truncate("short", 200), "short");
    }

    #[test]
    fn truncation_happens_before_trim() {
        // 149 chars then a space then more; the space lands at the cut edge
        // and must be trimmed so re-application cannot shorten it further.
        let input = format!("{} tail", "y".repeat(149));
        let once = sanitize_filename(&input);
        assert_eq!(sanitize_filename(&once), once);
    }
}
