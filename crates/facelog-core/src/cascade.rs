//! OpenCV Haar cascade model: XML parsing and single-window evaluation.
//!
//! Reads the `opencv-cascade-classifier` format written by
//! `opencv_traincascade` (BOOST stages, HAAR features), which is the format
//! of the bundled `haarcascade_frontalface_default.xml`.

use crate::detector::DetectorError;
use image::GrayImage;
use roxmltree::Node;

/// OpenCV subtracts this from every stage threshold when loading.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

/// Split node: `value < threshold` goes left, otherwise right.
/// Child indices `> 0` are nodes, `<= 0` are leaves at `-index`.
#[derive(Debug, Clone)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakTree {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    trees: Vec<WeakTree>,
}

/// A parsed boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    width: u32,
    height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl Cascade {
    /// Parse an OpenCV cascade XML document.
    pub fn parse(xml: &str) -> Result<Self, DetectorError> {
        let doc = roxmltree::Document::parse(xml)?;
        let storage = doc.root_element();

        if storage
            .children()
            .any(|n| n.attribute("type_id") == Some("opencv-haar-classifier"))
        {
            return Err(DetectorError::Unsupported(
                "legacy opencv-haar-classifier layout; re-export with opencv_traincascade".into(),
            ));
        }

        let cascade = storage
            .children()
            .find(|n| n.attribute("type_id") == Some("opencv-cascade-classifier"))
            .or_else(|| child(storage, "cascade"))
            .ok_or_else(|| parse_err("no cascade element"))?;

        let stage_type = text(child_req(cascade, "stageType")?);
        if stage_type != "BOOST" {
            return Err(DetectorError::Unsupported(format!("stage type {stage_type}")));
        }
        let feature_type = text(child_req(cascade, "featureType")?);
        if feature_type != "HAAR" {
            return Err(DetectorError::Unsupported(format!("feature type {feature_type}")));
        }

        let width: u32 = parse_one(child_req(cascade, "width")?)?;
        let height: u32 = parse_one(child_req(cascade, "height")?)?;
        if width < 3 || height < 3 {
            return Err(parse_err(format!("window {width}x{height} too small")));
        }

        let features = items(child_req(cascade, "features")?)
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child_req(cascade, "stages")?)
            .map(parse_stage)
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(parse_err("cascade has no stages"));
        }

        let cascade = Self {
            width,
            height,
            stages,
            features,
        };
        cascade.validate()?;

        tracing::debug!(
            window = ?(cascade.width, cascade.height),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "parsed Haar cascade"
        );

        Ok(cascade)
    }

    /// Base detection window, (width, height).
    pub fn window(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    ///
    /// The window must lie inside the integral image.
    pub fn evaluate(&self, ii: &IntegralImage, x: u32, y: u32) -> bool {
        // Variance normalisation over the window shrunk by one pixel per side.
        let (nw, nh) = (self.width - 2, self.height - 2);
        let area = (nw * nh) as f64;
        let sum = ii.sum(x + 1, y + 1, nw, nh);
        let sqsum = ii.sqsum(x + 1, y + 1, nw, nh);
        let nf = area * sqsum - sum * sum;
        let inv_norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .trees
                .iter()
                .map(|tree| self.tree_output(tree, ii, x, y, inv_norm))
                .sum();
            total >= stage.threshold
        })
    }

    fn tree_output(&self, tree: &WeakTree, ii: &IntegralImage, x: u32, y: u32, inv_norm: f64) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &tree.nodes[idx as usize];
            let value = self.feature_value(node.feature, ii, x, y) * inv_norm;
            idx = if value < node.threshold { node.left } else { node.right };
            if idx <= 0 {
                return tree.leaves[(-idx) as usize];
            }
        }
    }

    fn feature_value(&self, feature: usize, ii: &IntegralImage, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height))
            .sum()
    }

    /// Reject indices that would panic or loop during evaluation.
    fn validate(&self) -> Result<(), DetectorError> {
        for feature in &self.features {
            for r in &feature.rects {
                let right = r.x as u64 + r.width as u64;
                let bottom = r.y as u64 + r.height as u64;
                if right > self.width as u64 || bottom > self.height as u64 {
                    return Err(parse_err("feature rectangle outside the detection window"));
                }
            }
        }
        for (si, stage) in self.stages.iter().enumerate() {
            for tree in &stage.trees {
                for (ni, node) in tree.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(parse_err(format!(
                            "stage {si}: feature index {} out of range",
                            node.feature
                        )));
                    }
                    for child in [node.left, node.right] {
                        let ok = if child > 0 {
                            (child as usize) > ni && (child as usize) < tree.nodes.len()
                        } else {
                            ((-child) as usize) < tree.leaves.len()
                        };
                        if !ok {
                            return Err(parse_err(format!("stage {si}: bad tree child index {child}")));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Summed-area tables of an 8-bit image and of its squares.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<f64>,
    sqsum: Vec<f64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0f64; stride * (h + 1)];
        let mut sqsum = vec![0.0f64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..w {
                let p = img.get_pixel(x as u32, y as u32)[0] as f64;
                row_sum += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sqsum }
    }

    pub fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    pub fn sqsum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sqsum, self.stride, x, y, w, h)
    }

    fn rect(table: &[f64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
            + table[y0 * stride + x0]
    }
}

fn parse_stage(node: Node) -> Result<Stage, DetectorError> {
    let threshold: f64 = parse_one(child_req(node, "stageThreshold")?)?;
    let trees = items(child_req(node, "weakClassifiers")?)
        .map(parse_tree)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold: threshold - STAGE_THRESHOLD_EPS,
        trees,
    })
}

fn parse_tree(node: Node) -> Result<WeakTree, DetectorError> {
    let raw: Vec<f64> = parse_list(child_req(node, "internalNodes")?)?;
    let leaves: Vec<f64> = parse_list(child_req(node, "leafValues")?)?;

    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(parse_err(format!(
            "internalNodes has {} values, expected groups of 4 (categorical splits are not supported)",
            raw.len()
        )));
    }

    let nodes = raw
        .chunks_exact(4)
        .map(|c| {
            Ok(TreeNode {
                left: whole(c[0], "child index")?,
                right: whole(c[1], "child index")?,
                feature: whole(c[2], "feature index")?,
                threshold: c[3],
            })
        })
        .collect::<Result<Vec<_>, DetectorError>>()?;

    if leaves.len() != nodes.len() + 1 {
        return Err(parse_err(format!(
            "{} nodes need {} leaf values, got {}",
            nodes.len(),
            nodes.len() + 1,
            leaves.len()
        )));
    }

    Ok(WeakTree { nodes, leaves })
}

fn parse_feature(node: Node) -> Result<HaarFeature, DetectorError> {
    if let Some(tilted) = child(node, "tilted") {
        if text(tilted) != "0" {
            return Err(DetectorError::Unsupported("tilted Haar features".into()));
        }
    }

    let rects = items(child_req(node, "rects")?)
        .map(|r| {
            let v: Vec<f64> = parse_list(r)?;
            if v.len() != 5 {
                return Err(parse_err(format!("bad feature rect {v:?}")));
            }
            Ok(WeightedRect {
                x: whole(v[0], "rect x")?,
                y: whole(v[1], "rect y")?,
                width: whole(v[2], "rect width")?,
                height: whole(v[3], "rect height")?,
                weight: v[4],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if rects.is_empty() {
        return Err(parse_err("feature without rects"));
    }
    Ok(HaarFeature { rects })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.has_tag_name(name))
}

fn child_req<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, DetectorError> {
    child(node, name).ok_or_else(|| parse_err(format!("missing <{name}>")))
}

/// OpenCV sequence elements are stored as `<_>` children.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element() && n.has_tag_name("_"))
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("").trim()
}

fn parse_one<T: std::str::FromStr>(node: Node) -> Result<T, DetectorError> {
    let raw = text(node);
    raw.parse()
        .map_err(|_| parse_err(format!("<{}>: cannot parse {raw:?}", node.tag_name().name())))
}

fn parse_list(node: Node) -> Result<Vec<f64>, DetectorError> {
    text(node)
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| parse_err(format!("<{}>: cannot parse {t:?}", node.tag_name().name())))
        })
        .collect()
}

/// Exact integer from a numeric list, in range for `T`.
fn whole<T: TryFrom<i64>>(v: f64, what: &str) -> Result<T, DetectorError> {
    if !v.is_finite() || v.fract() != 0.0 || v.abs() > i32::MAX as f64 {
        return Err(parse_err(format!("{what} {v} is not a valid integer")));
    }
    T::try_from(v as i64).map_err(|_| parse_err(format!("{what} {v} out of range")))
}

fn parse_err(msg: impl Into<String>) -> DetectorError {
    DetectorError::Parse(msg.into())
}
