//! Intersecting requested regions with the regions a manifest grants.

use super::{Grant, Manifest, ManifestRegion};
use crate::types::{Region, RequestedRegions};
use crate::{Error, Result};

const CHR_PREFIX: &str = "chr";

/// Give a manifest reference name the `chr` prefix when the served files use it.
pub fn normalize_reference_name(name: &str, chr_prefix: bool) -> String {
    if chr_prefix && !name.starts_with(CHR_PREFIX) {
        format!("{}{}", CHR_PREFIX, name)
    } else {
        name.to_string()
    }
}

/// `"1"` and `"chr1"` name the same reference.
pub fn reference_names_match(a: &str, b: &str) -> bool {
    let strip = |name: &str| name.strip_prefix(CHR_PREFIX).unwrap_or(name).to_string();
    strip(a) == strip(b)
}

fn granted_region(region: &ManifestRegion, chr_prefix: bool) -> Region {
    Region::new(
        normalize_reference_name(&region.chromosome, chr_prefix),
        region.start,
        region.end,
    )
}

fn contains(granted: &ManifestRegion, requested: &Region) -> bool {
    let granted_start = granted.start.unwrap_or(0);
    let granted_end = granted.end.unwrap_or(u64::MAX);
    let requested_start = requested.start.unwrap_or(0);
    let requested_end = requested.end.unwrap_or(u64::MAX);
    requested_start >= granted_start && requested_end <= granted_end
}

/// Resolve what a manifest permits for a request.
///
/// Returns `Ok(None)` when the manifest grants nothing for the request. A
/// bounded region not contained in any granted region denies the whole
/// request, and so does an empty or inverted one.
pub fn resolve_regions(
    manifest: &Manifest,
    requested: &RequestedRegions,
    chr_prefix: bool,
) -> Result<Option<Grant>> {
    let regions = match requested {
        RequestedRegions::HeaderOnly => return Ok(Some(Grant::HeaderOnly)),
        RequestedRegions::All => manifest
            .regions
            .iter()
            .map(|granted| granted_region(granted, chr_prefix))
            .collect(),
        RequestedRegions::Regions(requested) => {
            let mut regions = Vec::new();
            for region in requested {
                region.validate()?;
                let mut matching = manifest.regions.iter().filter(|granted| {
                    reference_names_match(&granted.chromosome, &region.reference_name)
                });

                if region.is_unbounded() {
                    regions.extend(matching.map(|granted| granted_region(granted, chr_prefix)));
                    continue;
                }

                if matching.any(|granted| contains(granted, region)) {
                    regions.push(region.clone());
                } else {
                    tracing::info!("region {} is outside manifest {}", region, manifest.id);
                    return Err(Error::PermissionDenied(format!(
                        "could not access region {}",
                        region
                    )));
                }
            }
            regions
        }
    };

    if regions.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Grant::Regions(regions)))
    }
}
