//! In-memory collaborators for driving handlers and the dispatcher in tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    url_to_coordinates, Attachment, BotConfig, BotContext, BotError, Catmaid, ChatApi,
    ConnectorLink, ConnectorRelation, Mesh, Partner, Result, ReviewStatus, Skeleton,
    SkeletonNode, VolumeInfo, ZoteroItem, ZoteroLibrary,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PostedMessage {
    pub(crate) channel: String,
    pub(crate) text: String,
    pub(crate) attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UploadedFile {
    pub(crate) channel: String,
    pub(crate) path: PathBuf,
    pub(crate) title: String,
    pub(crate) comment: String,
    /// File content at upload time; the uploader may delete the file after.
    pub(crate) content: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct FakeChat {
    posts: Mutex<Vec<PostedMessage>>,
    deleted: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<UploadedFile>>,
    users: HashMap<String, String>,
    failing: Vec<String>,
    next_ts: AtomicU64,
}

impl FakeChat {
    pub(crate) fn with_user(mut self, id: &str, name: &str) -> Self {
        self.users.insert(id.to_string(), name.to_string());
        self
    }

    /// Posts to `channel` fail the way Slack rejects a deactivated user.
    pub(crate) fn failing_for(mut self, channel: &str) -> Self {
        self.failing.push(channel.to_string());
        self
    }

    pub(crate) fn posts(&self) -> Vec<PostedMessage> {
        self.posts.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.text).collect()
    }

    pub(crate) fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn uploads(&self) -> Vec<UploadedFile> {
        self.uploads.lock().unwrap().clone()
    }
}

impl ChatApi for FakeChat {
    fn post_message(&self, channel: &str, text: &str, attachments: &[Attachment]) -> Result<String> {
        if self.failing.iter().any(|c| c == channel) {
            return Err(BotError::Slack {
                method: "chat.postMessage".into(),
                error: "user_not_found".into(),
            });
        }
        self.posts.lock().unwrap().push(PostedMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            attachments: attachments.to_vec(),
        });
        let ts = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{ts}.000100"))
    }

    fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((channel.to_string(), ts.to_string()));
        Ok(())
    }

    fn upload_file(&self, channel: &str, path: &Path, title: &str, comment: &str) -> Result<()> {
        let content = std::fs::read(path)?;
        self.uploads.lock().unwrap().push(UploadedFile {
            channel: channel.to_string(),
            path: path.to_path_buf(),
            title: title.to_string(),
            comment: comment.to_string(),
            content,
        });
        Ok(())
    }

    fn list_users(&self) -> Result<HashMap<String, String>> {
        Ok(self.users.clone())
    }
}

#[derive(Debug, Clone)]
struct FakeNeuron {
    skeleton: Skeleton,
    total_nodes: u64,
    reviewed_nodes: u64,
    annotations: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeCatmaid {
    neurons: BTreeMap<u64, FakeNeuron>,
    annotated: HashMap<String, Vec<u64>>,
    partners: Vec<Partner>,
    volumes: Vec<(VolumeInfo, Mesh)>,
    fail_skeletons: bool,
}

/// Root at the origin, a branch point, two ends; one pre- and one postsynapse.
pub(crate) fn fake_skeleton(skid: u64, name: &str) -> Skeleton {
    let offset = skid as f64;
    let node = |id: u64, parent: Option<u64>, x: f64, y: f64| SkeletonNode {
        id: skid * 10 + id,
        parent: parent.map(|p| skid * 10 + p),
        x: x + offset,
        y: y + offset,
        z: 0.0,
    };
    Skeleton {
        skid,
        name: name.to_string(),
        nodes: vec![
            node(1, None, 0.0, 0.0),
            node(2, Some(1), 10.0, 0.0),
            node(3, Some(2), 20.0, 5.0),
            node(4, Some(2), 20.0, -5.0),
        ],
        connectors: vec![
            ConnectorLink {
                node_id: skid * 10 + 3,
                connector_id: skid * 100,
                relation: ConnectorRelation::Presynaptic,
            },
            ConnectorLink {
                node_id: skid * 10 + 4,
                connector_id: skid * 100 + 1,
                relation: ConnectorRelation::Postsynaptic,
            },
        ],
        tags: BTreeMap::new(),
    }
}

impl FakeCatmaid {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_neuron(mut self, skid: u64, name: &str) -> Self {
        self.neurons.insert(
            skid,
            FakeNeuron {
                skeleton: fake_skeleton(skid, name),
                total_nodes: 4,
                reviewed_nodes: 0,
                annotations: Vec::new(),
            },
        );
        self
    }

    pub(crate) fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        let total = skeleton.nodes.len() as u64;
        let entry = self.neurons.entry(skeleton.skid).or_insert(FakeNeuron {
            skeleton: Skeleton::default(),
            total_nodes: total,
            reviewed_nodes: 0,
            annotations: Vec::new(),
        });
        entry.total_nodes = total;
        entry.skeleton = skeleton;
        self
    }

    pub(crate) fn with_review(mut self, skid: u64, total: u64, reviewed: u64) -> Self {
        if let Some(neuron) = self.neurons.get_mut(&skid) {
            neuron.total_nodes = total;
            neuron.reviewed_nodes = reviewed;
        }
        self
    }

    pub(crate) fn with_annotation(mut self, annotation: &str, skids: &[u64]) -> Self {
        self.annotated
            .entry(annotation.to_string())
            .or_default()
            .extend_from_slice(skids);
        for skid in skids {
            if let Some(neuron) = self.neurons.get_mut(skid) {
                neuron.annotations.push(annotation.to_string());
            }
        }
        self
    }

    /// `synapses` maps each queried skid to its synapse count with the partner.
    pub(crate) fn with_partner(
        mut self,
        skid: u64,
        name: &str,
        direction: crate::Direction,
        synapses: &[(u64, u32)],
    ) -> Self {
        self.partners.push(Partner {
            skid,
            name: name.to_string(),
            direction,
            num_nodes: 1000,
            synapses: synapses.iter().copied().collect(),
        });
        self
    }

    pub(crate) fn with_volume(mut self, id: u64, name: &str) -> Self {
        let mesh = Mesh {
            vertices: vec![[-100.0, -100.0, 0.0], [500.0, -100.0, 0.0], [0.0, 500.0, 0.0]],
            faces: vec![[0, 1, 2]],
        };
        self.volumes.push((
            VolumeInfo {
                id,
                name: name.to_string(),
            },
            mesh,
        ));
        self
    }

    pub(crate) fn failing_skeletons(mut self) -> Self {
        self.fail_skeletons = true;
        self
    }
}

impl Catmaid for FakeCatmaid {
    fn skids_by_name(&self, name: &str) -> Result<Vec<u64>> {
        Ok(self
            .neurons
            .iter()
            .filter(|(_, n)| n.skeleton.name.contains(name))
            .map(|(skid, _)| *skid)
            .collect())
    }

    fn skids_by_annotation(&self, annotation: &str) -> Result<Vec<u64>> {
        Ok(self.annotated.get(annotation).cloned().unwrap_or_default())
    }

    fn neuron_exists(&self, skid: u64) -> Result<bool> {
        Ok(self.neurons.contains_key(&skid))
    }

    fn neuron_names(&self, skids: &[u64]) -> Result<BTreeMap<u64, String>> {
        let partner_names = self.partners.iter().map(|p| (p.skid, p.name.clone()));
        let neuron_names = self
            .neurons
            .iter()
            .map(|(skid, n)| (*skid, n.skeleton.name.clone()));
        let all: BTreeMap<u64, String> = partner_names.chain(neuron_names).collect();
        Ok(skids
            .iter()
            .filter_map(|skid| all.get(skid).map(|name| (*skid, name.clone())))
            .collect())
    }

    fn review_status(&self, skids: &[u64]) -> Result<Vec<ReviewStatus>> {
        Ok(skids
            .iter()
            .filter_map(|skid| {
                let neuron = self.neurons.get(skid)?;
                Some(ReviewStatus {
                    skid: *skid,
                    total_nodes: neuron.total_nodes,
                    reviewed_nodes: neuron.reviewed_nodes,
                })
            })
            .collect())
    }

    fn skeletons(&self, skids: &[u64]) -> Result<Vec<Skeleton>> {
        if self.fail_skeletons {
            return Err(BotError::Catmaid("skeleton service unavailable".into()));
        }
        skids
            .iter()
            .map(|skid| {
                self.neurons
                    .get(skid)
                    .map(|n| n.skeleton.clone())
                    .ok_or_else(|| BotError::Catmaid(format!("no skeleton #{skid}")))
            })
            .collect()
    }

    fn partners(&self, skids: &[u64], threshold: u32) -> Result<Vec<Partner>> {
        Ok(self
            .partners
            .iter()
            .filter_map(|p| {
                let synapses: BTreeMap<u64, u32> = p
                    .synapses
                    .iter()
                    .filter(|(source, _)| skids.contains(source))
                    .map(|(s, n)| (*s, *n))
                    .collect();
                let strongest = synapses.values().copied().max()?;
                (strongest >= threshold).then(|| Partner {
                    synapses,
                    ..p.clone()
                })
            })
            .collect())
    }

    fn annotations(&self, skids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>> {
        Ok(skids
            .iter()
            .filter_map(|skid| {
                let mut annotations = self.neurons.get(skid)?.annotations.clone();
                annotations.sort();
                Some((*skid, annotations))
            })
            .collect())
    }

    fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        Ok(self.volumes.iter().map(|(info, _)| info.clone()).collect())
    }

    fn volume_mesh(&self, volume_id: u64) -> Result<Mesh> {
        self.volumes
            .iter()
            .find(|(info, _)| info.id == volume_id)
            .map(|(_, mesh)| mesh.clone())
            .ok_or_else(|| BotError::Catmaid(format!("no volume {volume_id}")))
    }

    fn deep_link(&self, coords: [f64; 3], skid: u64, node_id: u64) -> String {
        url_to_coordinates("https://catmaid.test", 1, 5, coords, skid, node_id)
    }
}

#[derive(Default)]
pub(crate) struct FakeZotero {
    pub(crate) items: Vec<ZoteroItem>,
}

impl ZoteroLibrary for FakeZotero {
    fn items(&self) -> Result<Vec<ZoteroItem>> {
        Ok(self.items.clone())
    }

    fn download(&self, key: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, format!("%PDF {key}"))?;
        Ok(())
    }
}

/// Fresh data directory under the system temp dir, unique per test name.
pub(crate) fn temp_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("catbot_test")
        .join(format!("{}_{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Context wired to fakes, with stores under a fresh temp directory.
pub(crate) fn test_context(
    name: &str,
    chat: Arc<FakeChat>,
    catmaid: FakeCatmaid,
) -> BotContext {
    let mut config = BotConfig::default();
    config.bot.data_dir = temp_data_dir(name);
    config.catmaid.server_url = "https://catmaid.test".into();
    let config_path = config.bot.data_dir.join("catbot.json");
    BotContext::new(config, config_path, "UBOT".into(), chat, Arc::new(catmaid))
}
