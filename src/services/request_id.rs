use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MIN_LEN: usize = 8;
const MAX_LEN: usize = 128;

fn is_acceptable(candidate: &str) -> bool {
    (MIN_LEN..=MAX_LEN).contains(&candidate.len())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

/// Keep a client-supplied correlation id when it is well formed, otherwise mint one.
pub fn normalize(candidate: Option<&str>) -> String {
    match candidate.map(str::trim) {
        Some(id) if is_acceptable(id) => id.to_string(),
        _ => format!("req-{}", Uuid::new_v4().simple()),
    }
}
