//! S3 regions, canned ACLs, URL schemes and operation outcomes

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named deployment of the object store with its own endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier, also used as the SigV4 signing scope
    pub name: String,
    /// Host (optionally with port) requests are sent to
    pub endpoint: String,
    /// Declared on bucket creation when the region is not the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_constraint: Option<String>,
}

impl Region {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        location_constraint: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            location_constraint,
        }
    }
}

/// (name, endpoint, location constraint)
const BUILTIN_REGIONS: &[(&str, &str, Option<&str>)] = &[
    ("us-east-1", "s3.amazonaws.com", None),
    ("us-west-2", "s3-us-west-2.amazonaws.com", Some("us-west-2")),
    ("us-west-1", "s3-us-west-1.amazonaws.com", Some("us-west-1")),
    ("eu-west-1", "s3-eu-west-1.amazonaws.com", Some("eu-west-1")),
    ("ap-southeast-1", "s3-ap-southeast-1.amazonaws.com", Some("ap-southeast-1")),
    ("ap-southeast-2", "s3-ap-southeast-2.amazonaws.com", Some("ap-southeast-2")),
    ("ap-northeast-1", "s3-ap-northeast-1.amazonaws.com", Some("ap-northeast-1")),
    ("sa-east-1", "s3-sa-east-1.amazonaws.com", Some("sa-east-1")),
];

/// Immutable lookup table of regions, in benchmark order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCatalog {
    regions: Vec<Region>,
}

impl RegionCatalog {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// The eight AWS regions the benchmark covers by default
    pub fn builtin() -> Self {
        let regions = BUILTIN_REGIONS
            .iter()
            .map(|(name, endpoint, constraint)| {
                Region::new(*name, *endpoint, constraint.map(str::to_string))
            })
            .collect();
        Self { regions }
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Regions whose name matches `filter`
    pub fn matching<'a>(&'a self, filter: &'a Regex) -> impl Iterator<Item = &'a Region> + 'a {
        self.regions.iter().filter(move |r| filter.is_match(&r.name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for RegionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Canned access-control list sent as `x-amz-acl`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Acl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AuthenticatedRead => "authenticated-read",
            Acl::BucketOwnerRead => "bucket-owner-read",
            Acl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Acl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Acl::Private),
            "public-read" => Ok(Acl::PublicRead),
            "public-read-write" => Ok(Acl::PublicReadWrite),
            "authenticated-read" => Ok(Acl::AuthenticatedRead),
            "bucket-owner-read" => Ok(Acl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Acl::BucketOwnerFullControl),
            other => Err(format!("unknown canned ACL: {}", other)),
        }
    }
}

/// URL scheme used to reach an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "https" => Ok(Scheme::Https),
            "http" => Ok(Scheme::Http),
            other => Err(format!("unsupported scheme: {}", other)),
        }
    }
}

/// Result of a bucket creation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The store answered 409; the bucket is usable as-is
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = RegionCatalog::builtin();
        assert_eq!(catalog.len(), 8);

        let us_east = catalog.get("us-east-1").unwrap();
        assert_eq!(us_east.endpoint, "s3.amazonaws.com");
        assert_eq!(us_east.location_constraint, None);

        // Every non-default region declares itself as the constraint
        for region in catalog.iter().filter(|r| r.name != "us-east-1") {
            assert_eq!(region.location_constraint.as_deref(), Some(region.name.as_str()));
        }
    }

    #[test]
    fn test_matching_filter() {
        let catalog = RegionCatalog::builtin();
        let re = Regex::new("^ap-").unwrap();
        let names: Vec<&str> = catalog.matching(&re).map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["ap-southeast-1", "ap-southeast-2", "ap-northeast-1"]);

        let all = Regex::new(".").unwrap();
        assert_eq!(catalog.matching(&all).count(), 8);
    }

    #[test]
    fn test_acl_round_trip() {
        for acl in [
            Acl::Private,
            Acl::PublicRead,
            Acl::PublicReadWrite,
            Acl::AuthenticatedRead,
            Acl::BucketOwnerRead,
            Acl::BucketOwnerFullControl,
        ] {
            assert_eq!(acl.as_str().parse::<Acl>(), Ok(acl));
        }
        assert!("world-writable".parse::<Acl>().is_err());
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("HTTP".parse::<Scheme>(), Ok(Scheme::Http));
        assert_eq!(Scheme::default().as_str(), "https");
        assert!("ftp".parse::<Scheme>().is_err());
    }

    #[test]
    fn test_catalog_yaml() {
        let yaml = r#"
- name: local
  endpoint: "127.0.0.1:9000"
- name: eu-central-1
  endpoint: s3.eu-central-1.amazonaws.com
  location_constraint: eu-central-1
"#;
        let catalog: RegionCatalog = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("local").unwrap().location_constraint, None);
    }
}
