//! PDF sources, tried in a fixed order for every PMCID.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::client::HttpClient;
use super::error::DownloadError;
use crate::config::Endpoints;
use crate::parser::format_pmcid;
use crate::rate_limiter::services;

/// One place a PDF can be fetched from.
///
/// The manager acquires the rate limiter for [`Source::service_id`] before
/// each [`Source::fetch`].
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name recorded on each attempt.
    fn name(&self) -> &'static str;

    /// Rate limiter service id.
    fn service_id(&self) -> &'static str;

    /// URL of the PDF for a canonical PMCID.
    fn url(&self, pmcid: &str) -> String;

    /// Fetches the PDF for `pmcid` into `dest`, returning bytes written.
    async fn fetch(&self, pmcid: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// URL shapes of the built-in sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `{pmc}/articles/PMC{id}/pdf/`
    PmcPdfDirectory,
    /// `{pmc}/articles/PMC{id}/pdf/PMC{id}.pdf`
    PmcNamedPdf,
    /// `{europepmc}/articles/PMC{id}?pdf=render`
    EuropePmcRender,
}

impl SourceKind {
    fn name(self) -> &'static str {
        match self {
            Self::PmcPdfDirectory => "pmc_pdf_directory",
            Self::PmcNamedPdf => "pmc_named_pdf",
            Self::EuropePmcRender => "europe_pmc_render",
        }
    }

    fn service_id(self) -> &'static str {
        match self {
            Self::PmcPdfDirectory | Self::PmcNamedPdf => services::PMC,
            Self::EuropePmcRender => services::EUROPE_PMC_RENDER,
        }
    }
}

/// A built-in source fetching over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    kind: SourceKind,
    base_url: String,
    client: HttpClient,
}

impl HttpSource {
    /// Creates a source of `kind` rooted at `base_url`.
    #[must_use]
    pub fn new(kind: SourceKind, base_url: impl Into<String>, client: HttpClient) -> Self {
        Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn service_id(&self) -> &'static str {
        self.kind.service_id()
    }

    fn url(&self, pmcid: &str) -> String {
        let pmc = format_pmcid(pmcid);
        let base = &self.base_url;
        match self.kind {
            SourceKind::PmcPdfDirectory => format!("{base}/articles/{pmc}/pdf/"),
            SourceKind::PmcNamedPdf => format!("{base}/articles/{pmc}/pdf/{pmc}.pdf"),
            SourceKind::EuropePmcRender => format!("{base}/articles/{pmc}?pdf=render"),
        }
    }

    async fn fetch(&self, pmcid: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.client.fetch_pdf(&self.url(pmcid), dest).await
    }
}

/// The standard fallback order: PMC directory, PMC named file, Europe PMC render.
#[must_use]
pub fn default_sources(endpoints: &Endpoints, client: &HttpClient) -> Vec<Arc<dyn Source>> {
    vec![
        Arc::new(HttpSource::new(SourceKind::PmcPdfDirectory, &endpoints.pmc, client.clone())),
        Arc::new(HttpSource::new(SourceKind::PmcNamedPdf, &endpoints.pmc, client.clone())),
        Arc::new(HttpSource::new(
            SourceKind::EuropePmcRender,
            &endpoints.europe_pmc_site,
            client.clone(),
        )),
    ]
}
