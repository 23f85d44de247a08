// # Path Codec
//
// Converts between the raw LWM2M resource identifiers used on the wire and
// the versioned logical paths understood by the downstream system.
//
// ## Path Forms
//
// ```text
// raw      /3/0/9         object / instance / resource / resource-instance
// logical  /3_1.0/0/9     object id suffixed with the negotiated object version
// ```
//
// The object version comes from the registration's object link list
// (`</1>;ver=1.1,</3/0>`). Objects announced without a `ver` attribute are
// version 1.0.
//
// Everything here is a pure function of its inputs.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Object version assumed by LWM2M when none is announced
pub const DEFAULT_OBJECT_VERSION: &str = "1.0";

/// Separator between object id and version in a logical path
pub const VERSION_SEPARATOR: char = '_';

const MAX_DEPTH: usize = 4;

/// Object id → object version table of one registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectVersions(BTreeMap<u16, String>);

impl ObjectVersions {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, object_id: u16, version: impl Into<String>) -> Self {
        self.0.insert(object_id, version.into());
        self
    }

    /// Version announced for an object
    pub fn get(&self, object_id: u16) -> Option<&str> {
        self.0.get(&object_id).map(String::as_str)
    }

    /// Number of announced objects
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no object was announced
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A raw LWM2M path such as `/3/0/9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPath {
    pub object_id: u16,
    pub instance: Option<u16>,
    pub resource: Option<u16>,
    pub resource_instance: Option<u16>,
}

impl RawPath {
    fn segments(&self) -> impl Iterator<Item = u16> {
        [self.instance, self.resource, self.resource_instance]
            .into_iter()
            .map_while(|segment| segment)
    }
}

impl FromStr for RawPath {
    type Err = Error;

    fn from_str(path: &str) -> Result<Self> {
        let ids = parse_segments(path, |object| {
            object
                .parse::<u16>()
                .map_err(|_| Error::path_resolution(path, format!("invalid object id '{}'", object)))
        })?;
        let (object_id, rest) = ids;
        Ok(Self {
            object_id,
            instance: rest.first().copied(),
            resource: rest.get(1).copied(),
            resource_instance: rest.get(2).copied(),
        })
    }
}

impl fmt::Display for RawPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object_id)?;
        for segment in self.segments() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// A versioned logical path such as `/3_1.0/0/9`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalPath {
    raw: RawPath,
    version: String,
}

impl LogicalPath {
    /// The object version this path was resolved against
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The object id
    pub fn object_id(&self) -> u16 {
        self.raw.object_id
    }

    /// Convert back to the raw protocol path
    pub fn to_raw(&self) -> RawPath {
        self.raw
    }
}

impl FromStr for LogicalPath {
    type Err = Error;

    fn from_str(path: &str) -> Result<Self> {
        let mut version = String::new();
        let (object_id, rest) = parse_segments(path, |object| {
            let (id, ver) = object.split_once(VERSION_SEPARATOR).ok_or_else(|| {
                Error::path_resolution(path, "missing object version")
            })?;
            validate_version(ver).map_err(|reason| Error::path_resolution(path, reason))?;
            version = ver.to_string();
            id.parse::<u16>()
                .map_err(|_| Error::path_resolution(path, format!("invalid object id '{}'", id)))
        })?;
        Ok(Self {
            raw: RawPath {
                object_id,
                instance: rest.first().copied(),
                resource: rest.get(1).copied(),
                resource_instance: rest.get(2).copied(),
            },
            version,
        })
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}{}{}", self.raw.object_id, VERSION_SEPARATOR, self.version)?;
        for segment in self.raw.segments() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl Serialize for LogicalPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogicalPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Resolve a raw path against a registration's object table
///
/// # Parameters
///
/// - `raw`: Raw protocol path, e.g. `/3/0/9`
/// - `versions`: Object versions announced by the device
/// - `fallback`: Version used for objects missing from `versions`
///
/// # Returns
///
/// - `Ok(LogicalPath)`: e.g. `/3_1.0/0/9`
/// - `Err(Error::PathResolution)`: malformed path, or unknown object with no fallback
pub fn resolve(raw: &str, versions: &ObjectVersions, fallback: Option<&str>) -> Result<LogicalPath> {
    let raw_path: RawPath = raw.parse()?;
    let version = versions
        .get(raw_path.object_id)
        .or(fallback)
        .ok_or_else(|| {
            Error::path_resolution(
                raw,
                format!("object {} not announced by the device", raw_path.object_id),
            )
        })?;

    Ok(LogicalPath {
        raw: raw_path,
        version: version.to_string(),
    })
}

/// Parse a CoRE link-format object list into an object version table
///
/// Root and alternate-path links (`</>;rt="oma.lwm2m"`) are skipped. An
/// object-level `ver` attribute wins over the implicit 1.0 of instance links.
pub fn parse_object_links(links: &str) -> Result<ObjectVersions> {
    let mut versions = ObjectVersions::new();

    for link in links.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let close = link
            .find('>')
            .filter(|_| link.starts_with('<'))
            .ok_or_else(|| Error::path_resolution(link, "malformed object link"))?;
        let target = &link[1..close];

        let Ok(path) = target.parse::<RawPath>() else {
            continue;
        };

        let declared = link[close + 1..]
            .split(';')
            .filter_map(|attr| attr.trim().split_once('='))
            .find(|(key, _)| *key == "ver")
            .map(|(_, value)| value.trim_matches('"').to_string());

        match declared {
            Some(version) if path.instance.is_none() => {
                validate_version(&version).map_err(|reason| Error::path_resolution(link, reason))?;
                versions.0.insert(path.object_id, version);
            }
            _ => {
                versions
                    .0
                    .entry(path.object_id)
                    .or_insert_with(|| DEFAULT_OBJECT_VERSION.to_string());
            }
        }
    }

    Ok(versions)
}

/// Check that a version looks like `major.minor`
pub fn validate_version(version: &str) -> std::result::Result<(), String> {
    let valid = version
        .split_once('.')
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        });
    if valid {
        Ok(())
    } else {
        Err(format!("invalid object version '{}'", version))
    }
}

fn parse_segments(
    path: &str,
    mut object: impl FnMut(&str) -> Result<u16>,
) -> Result<(u16, Vec<u16>)> {
    let body = path
        .strip_prefix('/')
        .ok_or_else(|| Error::path_resolution(path, "path must start with '/'"))?;
    if body.is_empty() {
        return Err(Error::path_resolution(path, "root path has no object"));
    }

    let parts: Vec<&str> = body.split('/').collect();
    if parts.len() > MAX_DEPTH {
        return Err(Error::path_resolution(path, "path is deeper than a resource instance"));
    }

    let object_id = object(parts[0])?;
    let rest = parts[1..]
        .iter()
        .map(|part| {
            part.parse::<u16>()
                .map_err(|_| Error::path_resolution(path, format!("invalid segment '{}'", part)))
        })
        .collect::<Result<Vec<u16>>>()?;

    Ok((object_id, rest))
}
