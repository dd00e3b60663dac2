use quick_xml::de::from_reader;
use serde::Deserialize;
use std::{io::BufReader, path::Path};

use crate::utils::{open_file, path_str};
use crate::Error;

fn get_bool_value(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Action {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Data {
    #[serde(rename = "@scheme")]
    pub scheme: Option<String>,
    #[serde(rename = "@host")]
    pub host: Option<String>,
    #[serde(rename = "@path")]
    pub path: Option<String>,
    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IntentFilter {
    #[serde(rename = "action", default = "Vec::new")]
    actions: Vec<Action>,

    #[serde(rename = "category", default = "Vec::new")]
    categories: Vec<Category>,

    #[serde(default = "Vec::new")]
    data: Vec<Data>,
}

impl IntentFilter {
    /// A filter matching only the given action
    pub fn for_action(action: &str) -> Self {
        Self {
            actions: vec![Action {
                name: String::from(action),
            }],
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data.push(data);
        self
    }

    pub fn get_data(&self) -> &[Data] {
        self.data.as_slice()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|it| it.name == action)
    }

    /// Number of `<data android:scheme>` entries
    pub fn count_data_schemes(&self) -> usize {
        self.data.iter().filter(|it| it.scheme.is_some()).count()
    }

    /// Number of `<data android:mimeType>` entries
    pub fn count_data_types(&self) -> usize {
        self.data.iter().filter(|it| it.mime_type.is_some()).count()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Service {
    #[serde(rename = "@name")]
    pub name: String,

    #[serde(rename = "@enabled")]
    enabled: Option<String>,

    #[serde(rename = "@exported")]
    exported: Option<String>,

    #[serde(rename = "@permission")]
    pub permission: Option<String>,

    #[serde(rename = "intent-filter", default = "Vec::new")]
    pub intent_filters: Vec<IntentFilter>,
}

impl Service {
    pub fn new(name: &str, intent_filters: Vec<IntentFilter>) -> Self {
        Self {
            name: String::from(name),
            enabled: None,
            exported: None,
            permission: None,
            intent_filters,
        }
    }

    /// The `exported` attribute defaults to whether any `<intent-filter>` is present
    pub fn exported(&self) -> Option<bool> {
        match self.exported {
            None => Some(!self.intent_filters.is_empty()),
            Some(ref ex) => get_bool_value(ex),
        }
    }

    pub fn enabled(&self) -> Option<bool> {
        match self.enabled {
            None => Some(true),
            Some(ref en) => get_bool_value(en),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Application {
    #[serde(rename = "service", default = "Vec::new")]
    pub services: Vec<Service>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UsesPermission {
    #[serde(rename = "@name")]
    pub name: String,
}

impl<S> PartialEq<S> for UsesPermission
where
    S: AsRef<str>,
{
    fn eq(&self, other: &S) -> bool {
        self.name == other.as_ref()
    }
}

/// The slice of an `AndroidManifest.xml` that decides whether a package may
/// act as an app function agent or target: its requested permissions and its
/// services.
#[derive(Deserialize, Debug, Clone)]
pub struct Manifest {
    #[serde(rename = "@package")]
    pub package: String,
    #[serde(rename = "uses-permission", default = "Vec::new")]
    pub uses_permissions: Vec<UsesPermission>,
    #[serde(default)]
    pub application: Application,
}

impl Manifest {
    /// Parse an AndroidManifest.xml file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let file = match open_file(path) {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to open {}: {}", path_str(path), e);
                return Err(e);
            }
        };
        let mut br = BufReader::new(file);
        let manifest: Self = match from_reader(&mut br) {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to deserialize {}: {}", path_str(path), e);
                return Err(Error::parse(&format!("{}: {}", path_str(path), e)));
            }
        };
        Ok(manifest)
    }

    pub fn from_xml(raw: &str) -> crate::Result<Self> {
        quick_xml::de::from_str(raw).map_err(|e| Error::parse(&e))
    }

    pub fn get_uses_permissions(&self) -> &[UsesPermission] {
        self.uses_permissions.as_slice()
    }

    pub fn get_services(&self) -> &[Service] {
        self.application.services.as_slice()
    }
}
