//! Cell Painting location index and image source.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use crate::domain::InchiKey;
use crate::error::DiliError;
use crate::http::{HttpGet, HttpReply, default_headers, with_query};
use crate::image_array::ImageArray;
use crate::paginate::{FetchOutcome, Paginator};

pub const NEGATIVE_CONTROL: &str = "negcon";

/// Where a treatment was imaged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WellLocation {
    #[serde(rename = "Metadata_Source")]
    pub source: String,
    #[serde(rename = "Metadata_Batch")]
    pub batch: String,
    #[serde(rename = "Metadata_Plate")]
    pub plate: String,
    #[serde(rename = "Metadata_Well")]
    pub well: String,
    #[serde(rename = "Metadata_JCP2022", default)]
    pub jcp_id: Option<String>,
    #[serde(rename = "Metadata_InChIKey", default)]
    pub inchi_key: Option<String>,
    #[serde(rename = "Metadata_control_type", default)]
    pub control_type: Option<String>,
}

impl WellLocation {
    pub fn plate_key(&self) -> (&str, &str) {
        (&self.source, &self.plate)
    }
}

/// Lookups report `interrupted` when the index stopped answering part way,
/// so callers can tell an empty result from an incomplete one.
pub trait LocationIndex {
    fn locations_for_compound(
        &self,
        inchi_key: &InchiKey,
    ) -> Result<FetchOutcome<WellLocation>, DiliError>;

    fn negative_controls(
        &self,
        source: &str,
        plate: &str,
    ) -> Result<FetchOutcome<WellLocation>, DiliError>;
}

pub trait ImageSource {
    fn fetch_image(
        &self,
        location: &WellLocation,
        site: &str,
        channel: &str,
    ) -> Result<ImageArray, DiliError>;
}

/// Location lookups backed by the paginated JSON index.
pub struct HttpLocationIndex<H: HttpGet> {
    paginator: Paginator<H>,
    base_url: String,
}

impl<H: HttpGet> HttpLocationIndex<H> {
    pub fn new(http: H, base_url: impl Into<String>, page_size: usize) -> Self {
        Self {
            paginator: Paginator::with_page_size(http, page_size),
            base_url: base_url.into(),
        }
    }
}

impl<H: HttpGet> LocationIndex for HttpLocationIndex<H> {
    fn locations_for_compound(
        &self,
        inchi_key: &InchiKey,
    ) -> Result<FetchOutcome<WellLocation>, DiliError> {
        let url = with_query(
            &format!("{}/locations", self.base_url),
            &[("inchi_key", inchi_key.as_str())],
        );
        self.paginator
            .fetch_all(&url, "locations", &format!("locations for {inchi_key}"))
    }

    fn negative_controls(
        &self,
        source: &str,
        plate: &str,
    ) -> Result<FetchOutcome<WellLocation>, DiliError> {
        let url = with_query(
            &format!("{}/locations", self.base_url),
            &[
                ("source", source),
                ("plate", plate),
                ("control_type", NEGATIVE_CONTROL),
            ],
        );
        self.paginator.fetch_all(
            &url,
            "locations",
            &format!("negative controls for {source}/{plate}"),
        )
    }
}

/// Raw `.npy` downloads laid out as
/// `{base}/{source}/{batch}/{plate}/{well}/{site}/{channel}.npy`.
#[derive(Clone)]
pub struct HttpImageSource {
    client: Client,
    base_url: String,
}

impl HttpImageSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DiliError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| DiliError::ImagingHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn image_url(&self, location: &WellLocation, site: &str, channel: &str) -> String {
        let segments = [
            location.source.as_str(),
            location.batch.as_str(),
            location.plate.as_str(),
            location.well.as_str(),
            site,
        ]
        .iter()
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
        format!(
            "{}/{segments}/{}.npy",
            self.base_url,
            urlencoding::encode(channel)
        )
    }
}

impl HttpGet for HttpImageSource {
    fn get(&self, url: &str) -> Result<HttpReply, DiliError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .map_err(|err| DiliError::ImagingHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| DiliError::ImagingHttp(err.to_string()))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

impl ImageSource for HttpImageSource {
    fn fetch_image(
        &self,
        location: &WellLocation,
        site: &str,
        channel: &str,
    ) -> Result<ImageArray, DiliError> {
        let url = self.image_url(location, site, channel);
        let reply = self.get(&url)?;
        if !reply.is_success() {
            return Err(DiliError::ImagingStatus {
                status: reply.status,
                message: reply.text(),
            });
        }
        ImageArray::from_npy_bytes(&reply.body)
    }
}
