//! CATMAID annotation-database client.
//!
//! [`Catmaid`] is the seam handlers talk to; [`CatmaidClient`] implements it
//! over the REST API. Response parsing is kept in free functions so it can be
//! tested without a server.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::{BotError, CatmaidSection, Result};


static X3D_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"index="([^"]*)""#).expect("x3d index regex"));
static X3D_POINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"point="([^"]*)""#).expect("x3d point regex"));

/// Tags marking an end node as deliberately finished rather than open.
const END_TAGS: &[&str] = &["ends", "uncertain end", "uncertain_end", "uncertain_ends"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReviewStatus {
    pub(crate) skid: u64,
    pub(crate) total_nodes: u64,
    pub(crate) reviewed_nodes: u64,
}

impl ReviewStatus {
    pub(crate) fn percent_reviewed(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        (self.reviewed_nodes as f64 / self.total_nodes as f64 * 1000.0).round() / 10.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SkeletonNode {
    pub(crate) id: u64,
    pub(crate) parent: Option<u64>,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectorRelation {
    Presynaptic,
    Postsynaptic,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConnectorLink {
    pub(crate) node_id: u64,
    pub(crate) connector_id: u64,
    pub(crate) relation: ConnectorRelation,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Skeleton {
    pub(crate) skid: u64,
    pub(crate) name: String,
    pub(crate) nodes: Vec<SkeletonNode>,
    pub(crate) connectors: Vec<ConnectorLink>,
    pub(crate) tags: BTreeMap<String, Vec<u64>>,
}

impl Skeleton {
    pub(crate) fn root(&self) -> Option<&SkeletonNode> {
        self.nodes.iter().find(|n| n.parent.is_none())
    }

    fn child_counts(&self) -> HashMap<u64, usize> {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                *counts.entry(parent).or_default() += 1;
            }
        }
        counts
    }

    pub(crate) fn branch_points(&self) -> usize {
        self.child_counts().values().filter(|n| **n > 1).count()
    }

    /// Leaf nodes; the root is never counted as an end.
    pub(crate) fn end_nodes(&self) -> Vec<u64> {
        let counts = self.child_counts();
        self.nodes
            .iter()
            .filter(|n| n.parent.is_some() && !counts.contains_key(&n.id))
            .map(|n| n.id)
            .collect()
    }

    pub(crate) fn open_ends(&self) -> usize {
        let tagged: HashSet<u64> = END_TAGS
            .iter()
            .filter_map(|tag| self.tags.get(*tag))
            .flatten()
            .copied()
            .collect();
        self.end_nodes()
            .into_iter()
            .filter(|id| !tagged.contains(id))
            .count()
    }

    pub(crate) fn pre_synapses(&self) -> usize {
        self.connectors
            .iter()
            .filter(|c| c.relation == ConnectorRelation::Presynaptic)
            .count()
    }

    pub(crate) fn post_synapses(&self) -> usize {
        self.connectors
            .iter()
            .filter(|c| c.relation == ConnectorRelation::Postsynaptic)
            .count()
    }

    /// Parent/child segments as coordinate pairs.
    pub(crate) fn segments(&self) -> Vec<([f64; 3], [f64; 3])> {
        let by_id: HashMap<u64, &SkeletonNode> = self.nodes.iter().map(|n| (n.id, n)).collect();
        self.nodes
            .iter()
            .filter_map(|n| {
                let parent = by_id.get(&n.parent?)?;
                Some(([n.x, n.y, n.z], [parent.x, parent.y, parent.z]))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Direction {
    Upstream,
    Downstream,
}

impl Direction {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Partner {
    pub(crate) skid: u64,
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) num_nodes: u64,
    /// Synapse count per queried skeleton.
    pub(crate) synapses: BTreeMap<u64, u32>,
}

impl Partner {
    pub(crate) fn total(&self) -> u32 {
        self.synapses.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VolumeInfo {
    pub(crate) id: u64,
    pub(crate) name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Mesh {
    pub(crate) vertices: Vec<[f64; 3]>,
    pub(crate) faces: Vec<[usize; 3]>,
}

/// Read access to the annotation database.
pub(crate) trait Catmaid: Send + Sync {
    /// Skeleton ids of neurons whose name contains `name`.
    fn skids_by_name(&self, name: &str) -> Result<Vec<u64>>;
    fn skids_by_annotation(&self, annotation: &str) -> Result<Vec<u64>>;
    fn neuron_exists(&self, skid: u64) -> Result<bool>;
    fn neuron_names(&self, skids: &[u64]) -> Result<BTreeMap<u64, String>>;
    fn review_status(&self, skids: &[u64]) -> Result<Vec<ReviewStatus>>;
    fn skeletons(&self, skids: &[u64]) -> Result<Vec<Skeleton>>;
    fn partners(&self, skids: &[u64], threshold: u32) -> Result<Vec<Partner>>;
    fn annotations(&self, skids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>>;
    fn volumes(&self) -> Result<Vec<VolumeInfo>>;
    fn volume_mesh(&self, volume_id: u64) -> Result<Mesh>;
    /// Tracing-tool URL centred on `coords` with the given node selected.
    fn deep_link(&self, coords: [f64; 3], skid: u64, node_id: u64) -> String;
}

pub(crate) struct CatmaidClient {
    agent: ureq::Agent,
    server_url: String,
    project_id: u64,
    stack_id: u64,
    auth_token: String,
    basic_auth: Option<String>,
}

impl CatmaidClient {
    pub(crate) fn new(server_url: &str, section: &CatmaidSection) -> Self {
        Self::with_timeout(server_url, section, Duration::from_millis(section.timeout_ms))
    }

    pub(crate) fn with_timeout(server_url: &str, section: &CatmaidSection, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_write(timeout)
            .timeout_read(timeout)
            .build();
        let basic_auth = match (&section.http_user, &section.http_password) {
            (Some(user), Some(pw)) if !user.is_empty() => Some(format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pw}"))
            )),
            _ => None,
        };
        Self {
            agent,
            server_url: server_url.trim_end_matches('/').to_string(),
            project_id: section.project_id,
            stack_id: section.stack_id,
            auth_token: section.auth_token.clone(),
            basic_auth,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.server_url, self.project_id, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        let mut request = request;
        if !self.auth_token.is_empty() {
            request = request.set("X-Authorization", &format!("Token {}", self.auth_token));
        }
        if let Some(basic) = &self.basic_auth {
            request = request.set("Authorization", basic);
        }
        request
    }

    fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.endpoint(path);
        let response = self.authorize(self.agent.get(&url)).call();
        decode_response(path, response)
    }

    fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Value> {
        let url = self.endpoint(path);
        let pairs: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let response = self.authorize(self.agent.post(&url)).send_form(&pairs);
        decode_response(path, response)
    }
}

fn decode_response(
    path: &str,
    response: std::result::Result<ureq::Response, ureq::Error>,
) -> Result<Value> {
    let value = match response {
        Ok(resp) => resp
            .into_json::<Value>()
            .map_err(|e| BotError::http(path, e))?,
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            return Err(BotError::Catmaid(format!("{path} returned HTTP {code}: {body}")));
        }
        Err(err) => return Err(BotError::http(path, err)),
    };
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(BotError::Catmaid(format!("{path}: {err}")));
    }
    Ok(value)
}

/// `name[0]=a&name[1]=b` array encoding used by CATMAID form endpoints.
pub(crate) fn indexed_form(name: &str, values: &[u64]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{name}[{i}]"), v.to_string()))
        .collect()
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .or_else(|| value.as_f64().map(|f| f as u64))
}

fn entity_skids(value: &Value) -> Vec<u64> {
    value
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|entities| {
            entities
                .iter()
                .filter(|e| e.get("type").and_then(|t| t.as_str()).unwrap_or("neuron") == "neuron")
                .filter_map(|e| e.get("skeleton_ids").and_then(|s| s.as_array()))
                .flatten()
                .filter_map(as_u64)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_compact_skeleton(skid: u64, name: String, value: &Value) -> Result<Skeleton> {
    let parts = value
        .as_array()
        .ok_or_else(|| BotError::Catmaid(format!("unexpected skeleton payload for #{skid}")))?;

    let nodes = parts
        .first()
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    Some(SkeletonNode {
                        id: as_u64(row.first()?)?,
                        parent: row.get(1).and_then(as_u64),
                        x: row.get(3)?.as_f64()?,
                        y: row.get(4)?.as_f64()?,
                        z: row.get(5)?.as_f64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let connectors = parts
        .get(1)
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let relation = match row.get(2).and_then(as_u64) {
                        Some(0) => ConnectorRelation::Presynaptic,
                        Some(1) => ConnectorRelation::Postsynaptic,
                        _ => ConnectorRelation::Other,
                    };
                    Some(ConnectorLink {
                        node_id: as_u64(row.first()?)?,
                        connector_id: as_u64(row.get(1)?)?,
                        relation,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let tags = parts
        .get(2)
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .map(|(tag, ids)| {
                    let ids = ids
                        .as_array()
                        .map(|ids| ids.iter().filter_map(as_u64).collect())
                        .unwrap_or_default();
                    (tag.clone(), ids)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Skeleton {
        skid,
        name,
        nodes,
        connectors,
        tags,
    })
}

/// Parse a `skeletons/connectivity` response, keeping partners with at least
/// `threshold` synapses to any one queried skeleton.
pub(crate) fn parse_connectivity(value: &Value, threshold: u32) -> Vec<Partner> {
    let mut partners = Vec::new();
    for (key, direction) in [("incoming", Direction::Upstream), ("outgoing", Direction::Downstream)] {
        let Some(map) = value.get(key).and_then(|v| v.as_object()) else {
            continue;
        };
        for (partner_skid, entry) in map {
            let Ok(skid) = partner_skid.parse::<u64>() else {
                continue;
            };
            let synapses: BTreeMap<u64, u32> = entry
                .get("skids")
                .and_then(|v| v.as_object())
                .map(|links| {
                    links
                        .iter()
                        .filter_map(|(source, counts)| {
                            let source = source.parse::<u64>().ok()?;
                            let total = match counts {
                                Value::Array(levels) => levels.iter().filter_map(as_u64).sum::<u64>(),
                                other => as_u64(other).unwrap_or(0),
                            };
                            Some((source, total as u32))
                        })
                        .collect()
                })
                .unwrap_or_default();
            if synapses.values().copied().max().unwrap_or(0) < threshold {
                continue;
            }
            partners.push(Partner {
                skid,
                name: String::new(),
                direction,
                num_nodes: entry.get("num_nodes").and_then(as_u64).unwrap_or(0),
                synapses,
            });
        }
    }
    partners
}

/// Accepts both the legacy list-of-objects and the columnar volume listing.
pub(crate) fn parse_volume_list(value: &Value) -> Vec<VolumeInfo> {
    let from_object = |obj: &Value| -> Option<VolumeInfo> {
        Some(VolumeInfo {
            id: as_u64(obj.get("id")?)?,
            name: obj.get("name")?.as_str()?.to_string(),
        })
    };

    if let Some(list) = value.as_array() {
        return list.iter().filter_map(from_object).collect();
    }

    let columns: Vec<&str> = value
        .get("columns")
        .and_then(|v| v.as_array())
        .map(|cols| cols.iter().filter_map(|c| c.as_str()).collect())
        .unwrap_or_default();
    let (Some(id_idx), Some(name_idx)) = (
        columns.iter().position(|c| *c == "id"),
        columns.iter().position(|c| *c == "name"),
    ) else {
        return Vec::new();
    };
    value
        .get("data")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    Some(VolumeInfo {
                        id: as_u64(row.get(id_idx)?)?,
                        name: row.get(name_idx)?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a volume mesh, either a `[vertices, faces]` JSON pair or the X3D
/// `IndexedTriangleSet` markup CATMAID stores for volumes.
pub(crate) fn parse_mesh(mesh: &Value) -> Result<Mesh> {
    if let Some(pair) = mesh.as_array() {
        let vertices = pair
            .first()
            .and_then(|v| v.as_array())
            .map(|verts| {
                verts
                    .iter()
                    .filter_map(|v| {
                        let v = v.as_array()?;
                        Some([v.first()?.as_f64()?, v.get(1)?.as_f64()?, v.get(2)?.as_f64()?])
                    })
                    .collect()
            })
            .unwrap_or_default();
        let faces = pair
            .get(1)
            .and_then(|v| v.as_array())
            .map(|faces| {
                faces
                    .iter()
                    .filter_map(|f| {
                        let f = f.as_array()?;
                        Some([
                            as_u64(f.first()?)? as usize,
                            as_u64(f.get(1)?)? as usize,
                            as_u64(f.get(2)?)? as usize,
                        ])
                    })
                    .collect()
            })
            .unwrap_or_default();
        return Ok(Mesh { vertices, faces });
    }

    let markup = mesh
        .as_str()
        .ok_or_else(|| BotError::Catmaid("volume has no mesh".to_string()))?;
    let index: Vec<usize> = X3D_INDEX_RE
        .captures(markup)
        .map(|c| c[1].split_whitespace().filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();
    let points: Vec<f64> = X3D_POINT_RE
        .captures(markup)
        .map(|c| c[1].split_whitespace().filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();
    Ok(Mesh {
        vertices: points.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
        faces: index.chunks_exact(3).map(|f| [f[0], f[1], f[2]]).collect(),
    })
}

pub(crate) fn url_to_coordinates(
    server_url: &str,
    project_id: u64,
    stack_id: u64,
    coords: [f64; 3],
    skid: u64,
    node_id: u64,
) -> String {
    let base = format!("{}/", server_url.trim_end_matches('/'));
    let pairs = [
        ("pid", project_id.to_string()),
        ("xp", coords[0].to_string()),
        ("yp", coords[1].to_string()),
        ("zp", coords[2].to_string()),
        ("tool", "tracingtool".to_string()),
        ("sid0", stack_id.to_string()),
        ("s0", "0".to_string()),
        ("active_skeleton_id", skid.to_string()),
        ("active_node_id", node_id.to_string()),
    ];
    match Url::parse(&base) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
            url.to_string()
        }
        Err(_) => {
            let query = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{base}?{query}")
        }
    }
}

impl Catmaid for CatmaidClient {
    fn skids_by_name(&self, name: &str) -> Result<Vec<u64>> {
        let form = vec![
            ("name".to_string(), name.to_string()),
            ("name_exact".to_string(), "false".to_string()),
            ("types[0]".to_string(), "neuron".to_string()),
            ("with_annotations".to_string(), "false".to_string()),
        ];
        let value = self.post_form("annotations/query-targets", &form)?;
        Ok(entity_skids(&value))
    }

    fn skids_by_annotation(&self, annotation: &str) -> Result<Vec<u64>> {
        let listing = self.get_json("annotations/")?;
        let annotation_id = listing
            .get("annotations")
            .and_then(|v| v.as_array())
            .and_then(|all| {
                all.iter()
                    .find(|a| a.get("name").and_then(|n| n.as_str()) == Some(annotation))
                    .and_then(|a| a.get("id").and_then(as_u64))
            });
        let Some(annotation_id) = annotation_id else {
            return Ok(Vec::new());
        };
        let form = vec![
            ("annotated_with[0]".to_string(), annotation_id.to_string()),
            ("types[0]".to_string(), "neuron".to_string()),
            ("with_annotations".to_string(), "false".to_string()),
        ];
        let value = self.post_form("annotations/query-targets", &form)?;
        Ok(entity_skids(&value))
    }

    fn neuron_exists(&self, skid: u64) -> Result<bool> {
        match self.get_json(&format!("skeleton/{skid}/neuronname")) {
            Ok(value) => Ok(value.get("neuronname").is_some()),
            Err(BotError::Catmaid(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn neuron_names(&self, skids: &[u64]) -> Result<BTreeMap<u64, String>> {
        if skids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let value = self.post_form("skeleton/neuronnames", &indexed_form("skids", skids))?;
        Ok(value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn review_status(&self, skids: &[u64]) -> Result<Vec<ReviewStatus>> {
        let mut form = indexed_form("skeleton_ids", skids);
        form.push(("whitelist".to_string(), "false".to_string()));
        let value = self.post_form("skeletons/review-status", &form)?;
        Ok(skids
            .iter()
            .map(|skid| {
                let counts = value.get(skid.to_string()).and_then(|v| v.as_array());
                let at = |i: usize| counts.and_then(|c| c.get(i)).and_then(as_u64).unwrap_or(0);
                ReviewStatus {
                    skid: *skid,
                    total_nodes: at(0),
                    reviewed_nodes: at(1),
                }
            })
            .collect())
    }

    fn skeletons(&self, skids: &[u64]) -> Result<Vec<Skeleton>> {
        let names = self.neuron_names(skids)?;
        skids
            .iter()
            .map(|skid| {
                let value = self.get_json(&format!("{skid}/1/1/0/compact-skeleton"))?;
                let name = names.get(skid).cloned().unwrap_or_default();
                parse_compact_skeleton(*skid, name, &value)
            })
            .collect()
    }

    fn partners(&self, skids: &[u64], threshold: u32) -> Result<Vec<Partner>> {
        let mut form = indexed_form("source_skeleton_ids", skids);
        form.push(("boolean_op".to_string(), "OR".to_string()));
        form.push(("with_nodes".to_string(), "false".to_string()));
        let value = self.post_form("skeletons/connectivity", &form)?;
        let mut partners = parse_connectivity(&value, threshold);

        let mut partner_skids: Vec<u64> = partners.iter().map(|p| p.skid).collect();
        partner_skids.sort_unstable();
        partner_skids.dedup();
        let names = self.neuron_names(&partner_skids)?;
        for partner in &mut partners {
            partner.name = names.get(&partner.skid).cloned().unwrap_or_default();
        }
        Ok(partners)
    }

    fn annotations(&self, skids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>> {
        if skids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let value = self.post_form("annotations/forskeletons", &indexed_form("skeleton_ids", skids))?;
        let names: HashMap<String, String> = value
            .get("annotations")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(id, name)| Some((id.clone(), name.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let mut out = BTreeMap::new();
        if let Some(per_skeleton) = value.get("skeletons").and_then(|v| v.as_object()) {
            for (skid, links) in per_skeleton {
                let Ok(skid) = skid.parse::<u64>() else {
                    continue;
                };
                let mut annotations: Vec<String> = links
                    .as_array()
                    .map(|links| {
                        links
                            .iter()
                            .filter_map(|l| l.get("id").and_then(as_u64))
                            .filter_map(|id| names.get(&id.to_string()).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                annotations.sort();
                out.insert(skid, annotations);
            }
        }
        Ok(out)
    }

    fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        let value = self.get_json("volumes/")?;
        Ok(parse_volume_list(&value))
    }

    fn volume_mesh(&self, volume_id: u64) -> Result<Mesh> {
        let value = self.get_json(&format!("volumes/{volume_id}/"))?;
        parse_mesh(value.get("mesh").unwrap_or(&Value::Null))
    }

    fn deep_link(&self, coords: [f64; 3], skid: u64, node_id: u64) -> String {
        url_to_coordinates(&self.server_url, self.project_id, self.stack_id, coords, skid, node_id)
    }
}
