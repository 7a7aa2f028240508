use crate::types::{Format, HtsgetCapabilities, Organization, ServiceInfo, ServiceType};
use axum::Json;

pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.example.htsget-visa".to_string(),
        name: "htsget-visa".to_string(),
        r#type: ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "htsget".to_string(),
            version: "1.3.0".to_string(),
        },
        description: Some(
            "htsget ticket server with GA4GH passport visa authorization".to_string(),
        ),
        organization: Organization {
            name: "Example Organization".to_string(),
            url: "https://example.org".to_string(),
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        htsget: HtsgetCapabilities {
            datatype: "variants".to_string(),
            formats: vec![Format::Vcf, Format::Bcf],
            fields_parameter_effective: false,
            tags_parameters_effective: false,
        },
    })
}
