//! Store key-naming scheme.

pub fn rpm_capacity(prefix: &str) -> String {
    format!("{prefix}:rpm_capacity")
}

pub fn tpm_capacity(prefix: &str) -> String {
    format!("{prefix}:tpm_capacity")
}

pub fn rpm_window(prefix: &str) -> String {
    format!("{prefix}:rpm_window")
}

pub fn tpm_window(prefix: &str) -> String {
    format!("{prefix}:tpm_window")
}

pub fn rpd_counter(prefix: &str, day: &str) -> String {
    format!("{prefix}:rpd:{day}")
}

pub fn tpd_counter(prefix: &str, day: &str) -> String {
    format!("{prefix}:tpd:{day}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_key_shapes() {
        assert_eq!(rpm_capacity("apim_usage"), "apim_usage:rpm_capacity");
        assert_eq!(tpm_window("llm_usage"), "llm_usage:tpm_window");
        assert_eq!(rpd_counter("apim_usage", "2026-07-26"), "apim_usage:rpd:2026-07-26");
        assert_eq!(tpd_counter("apim_usage", "2026-07-26"), "apim_usage:tpd:2026-07-26");
    }
}
