//! Frontal (x/y) projection of skeletons and volume meshes to SVG.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::{BotError, Mesh, Result, Skeleton};

const CANVAS_WIDTH: f64 = 1200.0;
const CANVAS_HEIGHT: f64 = 900.0;
const MARGIN: f64 = 40.0;
const LEGEND_ROW: f64 = 18.0;

const NEURON_PALETTE: &[&str] = &[
    "#1F77B4", "#D62728", "#2CA02C", "#9467BD", "#FF7F0E", "#8C564B", "#E377C2", "#17BECF",
    "#BCBD22", "#7F7F7F",
];

pub(crate) const DEFAULT_VOLUME_COLOR: [f64; 3] = [0.85, 0.85, 0.85];

static VOLUME_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w.\-]+)\s*=\s*\(\s*([\d.]+)\s*,\s*([\d.]+)\s*,\s*([\d.]+)\s*\)")
        .expect("volume colour regex")
});

/// `<volume>=(r,g,b)` directives with channels in 0..=1; keys are lower-cased.
pub(crate) fn parse_volume_colors(command: &str) -> HashMap<String, [f64; 3]> {
    VOLUME_COLOR_RE
        .captures_iter(command)
        .filter_map(|c| {
            let channel = |i: usize| c[i].parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0));
            Some((c[1].to_lowercase(), [channel(2)?, channel(3)?, channel(4)?]))
        })
        .collect()
}

pub(crate) struct VolumeLayer {
    pub(crate) name: String,
    pub(crate) mesh: Mesh,
    pub(crate) color: [f64; 3],
}

fn css_rgb(color: [f64; 3]) -> String {
    let [r, g, b] = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
    format!("rgb({r},{g},{b})")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

struct Projection {
    min_x: f64,
    min_y: f64,
    scale: f64,
}

impl Projection {
    fn fit(points: impl Iterator<Item = (f64, f64)>) -> Option<Self> {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if !min_x.is_finite() {
            return None;
        }
        let span = (max_x - min_x).max(max_y - min_y).max(1.0);
        let usable = (CANVAS_WIDTH - 2.0 * MARGIN).min(CANVAS_HEIGHT - 2.0 * MARGIN);
        Some(Self {
            min_x,
            min_y,
            scale: usable / span,
        })
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            MARGIN + (x - self.min_x) * self.scale,
            MARGIN + (y - self.min_y) * self.scale,
        )
    }
}

/// Render neurons over translucent volumes. A legend is drawn when more than
/// one neuron is plotted.
pub(crate) fn render_svg(skeletons: &[Skeleton], volumes: &[VolumeLayer]) -> Result<String> {
    let neuron_points = skeletons
        .iter()
        .flat_map(|s| s.nodes.iter().map(|n| (n.x, n.y)));
    let volume_points = volumes
        .iter()
        .flat_map(|v| v.mesh.vertices.iter().map(|p| (p[0], p[1])));
    let projection = Projection::fit(neuron_points.chain(volume_points))
        .ok_or_else(|| BotError::Render("nothing to plot".to_string()))?;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{CANVAS_WIDTH}" height="{CANVAS_HEIGHT}" viewBox="0 0 {CANVAS_WIDTH} {CANVAS_HEIGHT}">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

    for volume in volumes {
        let _ = writeln!(
            svg,
            r#"<g id="volume-{}" fill="{}" fill-opacity="0.04" stroke="none">"#,
            escape_xml(&volume.name),
            css_rgb(volume.color)
        );
        for face in &volume.mesh.faces {
            let corners: Option<Vec<String>> = face
                .iter()
                .map(|i| {
                    let p = volume.mesh.vertices.get(*i)?;
                    let (x, y) = projection.apply(p[0], p[1]);
                    Some(format!("{x:.1},{y:.1}"))
                })
                .collect();
            if let Some(corners) = corners {
                let _ = writeln!(svg, r#"<polygon points="{}"/>"#, corners.join(" "));
            }
        }
        let _ = writeln!(svg, "</g>");
    }

    for (i, skeleton) in skeletons.iter().enumerate() {
        let color = NEURON_PALETTE[i % NEURON_PALETTE.len()];
        let _ = writeln!(
            svg,
            r#"<g id="neuron-{}" stroke="{color}" stroke-width="1" stroke-linecap="round">"#,
            skeleton.skid
        );
        for (child, parent) in skeleton.segments() {
            let (x1, y1) = projection.apply(child[0], child[1]);
            let (x2, y2) = projection.apply(parent[0], parent[1]);
            let _ = writeln!(
                svg,
                r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}"/>"#
            );
        }
        if let Some(root) = skeleton.root() {
            let (cx, cy) = projection.apply(root.x, root.y);
            let _ = writeln!(svg, r#"<circle cx="{cx:.1}" cy="{cy:.1}" r="3" fill="{color}"/>"#);
        }
        let _ = writeln!(svg, "</g>");
    }

    if skeletons.len() > 1 {
        let _ = writeln!(svg, r#"<g id="legend" font-family="sans-serif" font-size="12">"#);
        for (i, skeleton) in skeletons.iter().enumerate() {
            let color = NEURON_PALETTE[i % NEURON_PALETTE.len()];
            let y = MARGIN + i as f64 * LEGEND_ROW;
            let x = CANVAS_WIDTH - 300.0;
            let label = if skeleton.name.is_empty() {
                format!("#{}", skeleton.skid)
            } else {
                skeleton.name.clone()
            };
            let _ = writeln!(
                svg,
                r#"<rect x="{x}" y="{}" width="12" height="12" fill="{color}"/><text x="{}" y="{}">{}</text>"#,
                y - 10.0,
                x + 18.0,
                y,
                escape_xml(&label)
            );
        }
        let _ = writeln!(svg, "</g>");
    }

    svg.push_str("</svg>\n");
    Ok(svg)
}

pub(crate) fn write_svg(path: &Path, svg: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, svg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SkeletonNode;

    fn line_skeleton(skid: u64, name: &str) -> Skeleton {
        Skeleton {
            skid,
            name: name.into(),
            nodes: vec![
                SkeletonNode { id: 1, parent: None, x: 0.0, y: 0.0, z: 0.0 },
                SkeletonNode { id: 2, parent: Some(1), x: 100.0, y: 50.0, z: 0.0 },
            ],
            ..Skeleton::default()
        }
    }

    fn triangle() -> VolumeLayer {
        VolumeLayer {
            name: "v14.neuropil".into(),
            mesh: Mesh {
                vertices: vec![[-50.0, -50.0, 0.0], [200.0, -50.0, 0.0], [0.0, 200.0, 0.0]],
                faces: vec![[0, 1, 2], [0, 1, 9]],
            },
            color: DEFAULT_VOLUME_COLOR,
        }
    }

    #[test]
    fn single_neuron_has_no_legend() {
        let svg = render_svg(&[line_skeleton(16, "DA1")], &[triangle()]).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"id="neuron-16""#));
        assert!(svg.contains(r#"id="volume-v14.neuropil""#));
        assert_eq!(svg.matches("<line").count(), 1);
        // Face with an out-of-range index is skipped.
        assert_eq!(svg.matches("<polygon").count(), 1);
        assert!(!svg.contains("legend"));
    }

    #[test]
    fn several_neurons_get_a_legend() {
        let svg = render_svg(
            &[line_skeleton(16, "DA1 <left>"), line_skeleton(17, "")],
            &[],
        )
        .unwrap();
        assert!(svg.contains(r#"id="legend""#));
        assert!(svg.contains("DA1 &lt;left&gt;"));
        assert!(svg.contains(">#17<"));
    }

    #[test]
    fn empty_scene_is_a_render_error() {
        assert!(matches!(render_svg(&[], &[]), Err(BotError::Render(_))));
    }

    #[test]
    fn parses_volume_colours() {
        let colors = parse_volume_colors("plot #16 LH_R=(1, 0, 0.5) MB_CA_R=(0.2,0.2,2)");
        assert_eq!(colors["lh_r"], [1.0, 0.0, 0.5]);
        assert_eq!(colors["mb_ca_r"], [0.2, 0.2, 1.0]);
        assert!(parse_volume_colors("plot #16").is_empty());
    }

    #[test]
    fn css_colour_scales_channels() {
        assert_eq!(css_rgb([1.0, 0.0, 0.5]), "rgb(255,0,128)");
    }
}
