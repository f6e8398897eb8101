//! Owner lookups against the DMV reference datasets.
//!
//! Sources are consulted in order and the first match wins; records from
//! different sources are never combined.

use crate::types::VehicleRecord;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub trait ReferenceSource: Send + Sync {
    fn name(&self) -> &str;
    fn lookup(&self, plate: &str) -> Option<VehicleRecord>;
}

fn describe(color: &str, make: &str, model: &str) -> String {
    format!("{} {} {}", color, make, model)
}

#[derive(Debug, Deserialize)]
struct JsonDocument {
    dmv: Option<JsonDmv>,
}

#[derive(Debug, Deserialize)]
struct JsonDmv {
    /// Kept raw so one bad entry does not discard the rest.
    #[serde(default)]
    vehicle: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonVehicle {
    #[serde(rename = "_plate")]
    plate: String,
    #[serde(default)]
    owner: Option<JsonOwner>,
    #[serde(default)]
    color: String,
    #[serde(default)]
    make: String,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Default, Deserialize)]
struct JsonOwner {
    #[serde(default)]
    name: String,
    #[serde(default)]
    contact: String,
}

/// Flat dataset keyed by plate (the JSON DMV export).
pub struct JsonReferenceSource {
    vehicles: HashMap<String, VehicleRecord>,
}

impl JsonReferenceSource {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_contents(&contents),
            Err(e) => {
                error!("Error loading DMV JSON database {:?}: {}", path, e);
                Self::empty()
            }
        }
    }

    pub fn from_contents(contents: &str) -> Self {
        match serde_json::from_str::<JsonDocument>(contents) {
            Ok(document) => {
                let mut vehicles = HashMap::new();
                for (index, entry) in document
                    .dmv
                    .map(|dmv| dmv.vehicle)
                    .unwrap_or_default()
                    .into_iter()
                    .enumerate()
                {
                    let v = match serde_json::from_value::<JsonVehicle>(entry) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Skipping DMV JSON vehicle #{}: {}", index, e);
                            continue;
                        }
                    };
                    let owner = v.owner.unwrap_or_default();
                    let record = VehicleRecord {
                        plate: v.plate.clone(),
                        owner: owner.name,
                        email: owner.contact,
                        vehicle_description: describe(&v.color, &v.make, &v.model),
                    };
                    vehicles.entry(v.plate).or_insert(record);
                }
                info!("DMV JSON database loaded with {} vehicles", vehicles.len());
                JsonReferenceSource { vehicles }
            }
            Err(e) => {
                error!("Malformed DMV JSON database: {}", e);
                Self::empty()
            }
        }
    }

    fn empty() -> Self {
        JsonReferenceSource {
            vehicles: HashMap::new(),
        }
    }
}

impl ReferenceSource for JsonReferenceSource {
    fn name(&self) -> &str {
        "json"
    }

    fn lookup(&self, plate: &str) -> Option<VehicleRecord> {
        self.vehicles.get(plate).cloned()
    }
}

/// Hierarchical dataset: `<dmv><vehicle plate=".."><owner>..</owner>..</vehicle></dmv>`.
pub struct XmlReferenceSource {
    vehicles: HashMap<String, VehicleRecord>,
}

impl XmlReferenceSource {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_contents(&contents),
            Err(e) => {
                error!("Error loading DMV XML database {:?}: {}", path, e);
                Self::empty()
            }
        }
    }

    /// A document that fails to parse behaves as an empty dataset.
    pub fn from_contents(contents: &str) -> Self {
        match parse_xml(contents) {
            Ok(vehicles) => {
                info!("DMV XML database loaded with {} vehicles", vehicles.len());
                XmlReferenceSource { vehicles }
            }
            Err(e) => {
                error!("Malformed DMV XML database: {}", e);
                Self::empty()
            }
        }
    }

    fn empty() -> Self {
        XmlReferenceSource {
            vehicles: HashMap::new(),
        }
    }
}

fn parse_xml(contents: &str) -> Result<HashMap<String, VehicleRecord>, roxmltree::Error> {
    let document = roxmltree::Document::parse(contents)?;
    let root = document.root_element();
    let mut vehicles = HashMap::new();
    if !root.has_tag_name("dmv") {
        warn!("DMV XML root element is <{}>, expected <dmv>", root.tag_name().name());
        return Ok(vehicles);
    }
    for node in root.children().filter(|n| n.has_tag_name("vehicle")) {
        let plate = match node.attribute("plate") {
            Some(p) => p.to_string(),
            None => {
                warn!("Skipping DMV XML vehicle without a plate attribute");
                continue;
            }
        };
        let owner = child(node, "owner");
        let record = VehicleRecord {
            plate: plate.clone(),
            owner: owner.map(|o| child_text(o, "name")).unwrap_or_default(),
            email: owner.map(|o| child_text(o, "contact")).unwrap_or_default(),
            vehicle_description: describe(
                &child_text(node, "color"),
                &child_text(node, "make"),
                &child_text(node, "model"),
            ),
        };
        vehicles.entry(plate).or_insert(record);
    }
    Ok(vehicles)
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text(node: roxmltree::Node, tag: &str) -> String {
    child(node, tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

impl ReferenceSource for XmlReferenceSource {
    fn name(&self) -> &str {
        "xml"
    }

    fn lookup(&self, plate: &str) -> Option<VehicleRecord> {
        self.vehicles.get(plate).cloned()
    }
}

pub struct ReferenceResolver {
    sources: Vec<Box<dyn ReferenceSource>>,
}

impl ReferenceResolver {
    /// `sources` in priority order.
    pub fn new(sources: Vec<Box<dyn ReferenceSource>>) -> Self {
        ReferenceResolver { sources }
    }

    pub fn load(json_path: &Path, xml_path: &Path) -> Self {
        ReferenceResolver::new(vec![
            Box::new(JsonReferenceSource::load(json_path)),
            Box::new(XmlReferenceSource::load(xml_path)),
        ])
    }

    pub fn resolve(&self, plate: &str) -> VehicleRecord {
        info!("Searching for plate {} in DMV database", plate);
        for source in &self.sources {
            if let Some(record) = source.lookup(plate) {
                info!("Vehicle {} found in {} database", plate, source.name());
                return record;
            }
        }
        info!("Vehicle {} not found", plate);
        VehicleRecord::unknown(plate)
    }
}
