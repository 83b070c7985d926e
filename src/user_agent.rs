//! User-Agent strings sent to lookup services and PDF hosts.
//!
//! NCBI and Crossref both ask clients to identify themselves; the contact
//! email, when configured, is appended so operators can reach the user.

const PROJECT_UA_URL: &str = "https://github.com/pmcfetch/pmcfetch";

/// User-Agent for lookup requests (E-utilities, Europe PMC, Crossref).
#[must_use]
pub(crate) fn lookup_user_agent(email: Option<&str>) -> String {
    with_contact(format!("pmcfetch/{} (lookup; +{PROJECT_UA_URL})", version()), email)
}

/// User-Agent for PDF downloads.
#[must_use]
pub(crate) fn download_user_agent(email: Option<&str>) -> String {
    with_contact(format!("pmcfetch/{} (open-access-pdf; +{PROJECT_UA_URL})", version()), email)
}

fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn with_contact(base: String, email: Option<&str>) -> String {
    match email.map(str::trim).filter(|e| !e.is_empty() && !e.contains(['\r', '\n', '\0'])) {
        Some(email) => format!("{base} mailto:{email}"),
        None => base,
    }
}
