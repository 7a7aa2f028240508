use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// htsget 1.3 ticket response
#[derive(Debug, Serialize)]
pub struct HtsgetResponse {
    pub htsget: HtsgetResponseBody,
}

#[derive(Debug, Serialize)]
pub struct HtsgetResponseBody {
    pub format: Format,
    pub urls: Vec<UrlEntry>,
}

/// One block of a ticket: a URL the client dereferences for a contiguous byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<DataClass>,
}

impl UrlEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: None,
            class: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value.into());
        self
    }

    pub fn with_class(mut self, class: DataClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|h| h.get(name))
            .map(String::as_str)
    }
}

/// Variant formats served by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    #[default]
    Vcf,
    Bcf,
}

impl Format {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Format::Vcf => "vcf.gz",
            Format::Bcf => "bcf",
        }
    }

    /// Extension of the positional index used for region lookups, if supported.
    pub fn index_extension(&self) -> Option<&'static str> {
        match self {
            Format::Vcf => Some("tbi"),
            Format::Bcf => None,
        }
    }
}

/// Data class - header only or full data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    #[default]
    Body,
    Header,
}

/// Query parameters for GET requests
#[derive(Debug, Deserialize, Default)]
pub struct VariantsQuery {
    pub format: Option<Format>,
    pub class: Option<DataClass>,
    #[serde(rename = "referenceName")]
    pub reference_name: Option<String>,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// POST request body for multiple regions
#[derive(Debug, Deserialize, Default)]
pub struct VariantsPostBody {
    pub format: Option<Format>,
    pub class: Option<DataClass>,
    pub regions: Option<Vec<Region>>,
}

/// A genomic interval: 0-based, half-open, either bound may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

impl Region {
    pub fn new(reference_name: impl Into<String>, start: Option<u64>, end: Option<u64>) -> Self {
        Self {
            reference_name: reference_name.into(),
            start,
            end,
        }
    }

    pub fn whole(reference_name: impl Into<String>) -> Self {
        Self::new(reference_name, None, None)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Reject regions no index lookup or manifest check can answer.
    pub fn validate(&self) -> Result<()> {
        if self.reference_name.is_empty() {
            return Err(Error::InvalidInput("empty referenceName".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(Error::InvalidRange(format!(
                    "start {} must be less than end {} in {}",
                    start, end, self.reference_name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference_name)?;
        match (self.start, self.end) {
            (None, None) => Ok(()),
            (start, end) => {
                let start = start.map(|s| s.to_string()).unwrap_or_default();
                let end = end.map(|e| e.to_string()).unwrap_or_default();
                write!(f, ":{}-{}", start, end)
            }
        }
    }
}

/// What a ticket request asks for, independent of GET or POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedRegions {
    HeaderOnly,
    All,
    Regions(Vec<Region>),
}

impl RequestedRegions {
    /// Every region is validated, header requests included.
    pub fn from_parts(class: DataClass, regions: Option<Vec<Region>>) -> Result<Self> {
        for region in regions.iter().flatten() {
            region.validate()?;
        }

        Ok(match (class, regions) {
            (DataClass::Header, _) => RequestedRegions::HeaderOnly,
            (DataClass::Body, Some(regions)) if !regions.is_empty() => {
                RequestedRegions::Regions(regions)
            }
            (DataClass::Body, _) => RequestedRegions::All,
        })
    }
}

impl VariantsQuery {
    pub fn requested_regions(&self) -> Result<RequestedRegions> {
        let regions = match &self.reference_name {
            Some(name) => Some(vec![Region::new(name.clone(), self.start, self.end)]),
            None if self.start.is_some() || self.end.is_some() => {
                return Err(Error::InvalidInput(
                    "start and end require referenceName".to_string(),
                ));
            }
            None => None,
        };
        RequestedRegions::from_parts(self.class.unwrap_or_default(), regions)
    }
}

impl VariantsPostBody {
    pub fn requested_regions(&self) -> Result<RequestedRegions> {
        RequestedRegions::from_parts(self.class.unwrap_or_default(), self.regions.clone())
    }
}

/// GA4GH service-info response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub r#type: ServiceType,
    pub description: Option<String>,
    pub organization: Organization,
    pub version: String,
    pub htsget: HtsgetCapabilities,
}

#[derive(Debug, Serialize)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HtsgetCapabilities {
    pub datatype: String,
    pub formats: Vec<Format>,
    #[serde(rename = "fieldsParameterEffective")]
    pub fields_parameter_effective: bool,
    #[serde(rename = "tagsParametersEffective")]
    pub tags_parameters_effective: bool,
}
