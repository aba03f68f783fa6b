//! What to fetch for a node and how to decode it, resolved on the frame thread
//! so the load task owns everything it needs.

use super::LoadError;
use crate::decode::binary::{BinaryDecodeParams, decode_binary};
use crate::decode::greyhound::{Dimension, GreyhoundDecodeParams, decode_greyhound};
use crate::decode::las::decode_las;
use crate::decode::laz::decode_laz;
use crate::decode::pool::run_decode;
use crate::greyhound::GreyhoundHierarchy;
use crate::hierarchy::{HierarchyEntry, needs_hierarchy_block, parse_hierarchy_block};
use crate::octree::NodeId;
use crate::octree::geometry::{Backend, PointFormat};
use crate::octree::point_attributes::{COLOR_PACKED, POSITION_CARTESIAN, PointAttributes};
use crate::point::PointBatch;
use crate::point_cloud::PointCloudOctree;
use crate::resource::ResourceClient;
use crate::version::Version;
use glam::DVec3;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HierarchyRequest {
    /// Binary block of 5-byte records rooted at `root_name`.
    Block { url: String, root_name: String },
    /// Nested JSON covering `step` levels below `root_name`.
    Greyhound {
        url: String,
        root_name: String,
        step: u32,
    },
}

impl HierarchyRequest {
    /// The request revealing the children of a node, if loading it requires one.
    pub(crate) fn for_node(cloud: &PointCloudOctree, node_id: NodeId) -> Option<Self> {
        let node = cloud.node(node_id)?;
        let geometry = cloud.geometry();
        let step = geometry.hierarchy_step_size;
        if !node.children_unknown() || !needs_hierarchy_block(node.level, step, node.has_children) {
            return None;
        }

        match &geometry.backend {
            Backend::Octree { .. } => Some(Self::Block {
                url: geometry.hierarchy_url(&node.name)?,
                root_name: node.name.clone(),
            }),
            Backend::Greyhound(source) => Some(Self::Greyhound {
                url: source.hierarchy_url(
                    &node.bounding_box.translated(geometry.offset),
                    node.level,
                    step,
                ),
                root_name: node.name.clone(),
                step,
            }),
            Backend::Arena(_) => None,
        }
    }

    pub(crate) async fn fetch<C: ResourceClient>(
        &self,
        client: &C,
    ) -> Result<Vec<HierarchyEntry>, LoadError> {
        match self {
            Self::Block { url, root_name } => {
                let buf = client.get(url, None).await?;
                Ok(parse_hierarchy_block(&buf, root_name)?)
            }
            Self::Greyhound {
                url,
                root_name,
                step,
            } => {
                let hierarchy: GreyhoundHierarchy = client.get_json(url, None).await?;
                Ok(hierarchy.entries(root_name, *step))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PayloadDecoder {
    Binary {
        attributes: PointAttributes,
        params: BinaryDecodeParams,
    },
    /// LAS or LAZ, told apart by the header.
    Las { translation: DVec3 },
    Greyhound {
        schema: Vec<Dimension>,
        params: GreyhoundDecodeParams,
    },
    /// LAZ-compressed Greyhound `read` response.
    CompressedGreyhound { translation: DVec3 },
}

impl PayloadDecoder {
    fn decode(&self, buffer: &[u8]) -> crate::decode::DecodeResult<PointBatch> {
        match self {
            Self::Binary { attributes, params } => decode_binary(buffer, attributes, params),
            Self::Las { translation } => decode_las(buffer, *translation),
            Self::Greyhound { schema, params } => decode_greyhound(buffer, schema, params),
            Self::CompressedGreyhound { translation } => decode_laz(buffer, *translation),
        }
    }
}

/// Everything a load task needs, detached from the tree.
#[derive(Debug, Clone)]
pub(crate) struct LoadPlan {
    pub name: String,
    pub hierarchy: Option<HierarchyRequest>,
    pub url: String,
    pub decoder: PayloadDecoder,
    /// Node box min in the geometry frame; decoded positions are relative to it.
    pub origin: DVec3,
}

impl LoadPlan {
    pub(crate) fn new(cloud: &PointCloudOctree, node_id: NodeId) -> Result<Self, LoadError> {
        let node = cloud.node(node_id).ok_or(LoadError::NodeNotFound)?;
        let geometry = cloud.geometry();
        let origin = node.bounding_box.min;
        let world_origin = geometry.offset + origin;

        let (url, decoder) = match &geometry.backend {
            Backend::Octree { format, .. } => {
                let url = geometry
                    .node_url(&node.name)
                    .ok_or(LoadError::NodeNotFound)?;
                let decoder = match format {
                    PointFormat::Binary(attributes) => {
                        let quantized = geometry.version.newer_than((1, 3));
                        PayloadDecoder::Binary {
                            attributes: attributes.clone(),
                            params: BinaryDecodeParams {
                                scale: geometry.scale,
                                // quantized positions are already node-relative
                                offset: if quantized { DVec3::ZERO } else { -origin },
                                version: geometry.version,
                            },
                        }
                    }
                    PointFormat::Las | PointFormat::Laz => PayloadDecoder::Las {
                        translation: -world_origin,
                    },
                };
                (url, decoder)
            }
            Backend::Greyhound(source) => {
                let world_box = node.bounding_box.translated(geometry.offset);
                let decoder = if source.compress {
                    PayloadDecoder::CompressedGreyhound {
                        translation: -world_origin,
                    }
                } else {
                    PayloadDecoder::Greyhound {
                        schema: source.schema.clone(),
                        params: GreyhoundDecodeParams {
                            scale: source.scale,
                            translation: -origin,
                        },
                    }
                };
                (source.read_url(&world_box, node.level), decoder)
            }
            Backend::Arena(source) => (
                source.node_url(&node.name),
                PayloadDecoder::Binary {
                    attributes: PointAttributes::from_attributes([POSITION_CARTESIAN, COLOR_PACKED]),
                    params: BinaryDecodeParams {
                        scale: 1.0,
                        offset: -world_origin,
                        version: Version::new(1, 3),
                    },
                },
            ),
        };

        Ok(Self {
            name: node.name.clone(),
            hierarchy: HierarchyRequest::for_node(cloud, node_id),
            url,
            decoder,
            origin,
        })
    }

    /// Fetch the hierarchy block if any, then the points.
    pub(crate) async fn execute<C: ResourceClient>(
        self,
        client: &C,
        decode_off_thread: bool,
    ) -> Result<(Option<Vec<HierarchyEntry>>, PointBatch), LoadError> {
        let hierarchy = match &self.hierarchy {
            Some(request) => Some(request.fetch(client).await?),
            None => None,
        };

        let buffer = client.get(&self.url, None).await?;
        let decoder = self.decoder;
        let mut batch = run_decode(decode_off_thread, move || decoder.decode(&buffer)).await?;
        batch.origin = self.origin;

        Ok((hierarchy, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::aabb::Aabb;
    use crate::octree::geometry::OctreeGeometry;
    use crate::resource::memory::MemoryClient;
    use futures::executor::block_on;

    fn cloud(version: Version, format: PointFormat, step: u32) -> PointCloudOctree {
        PointCloudOctree::from_geometry(OctreeGeometry {
            version,
            spacing: 1.0,
            bounding_box: Aabb::new(DVec3::ZERO, DVec3::splat(8.0)),
            tight_bounding_box: None,
            offset: DVec3::new(100.0, 0.0, 0.0),
            scale: 0.5,
            hierarchy_step_size: step,
            projection: None,
            backend: Backend::Octree {
                octree_dir: "mem://data".to_string(),
                format,
            },
        })
    }

    fn positions_only() -> PointFormat {
        PointFormat::Binary(PointAttributes::from_attributes([POSITION_CARTESIAN]))
    }

    #[test]
    fn paged_root_fetches_hierarchy_first() {
        let cloud = cloud(Version::new(1, 7), positions_only(), 5);
        let plan = LoadPlan::new(&cloud, cloud.root_id()).unwrap();
        assert_eq!(plan.url, "mem://data/r/r.bin");
        assert_eq!(
            plan.hierarchy,
            Some(HierarchyRequest::Block {
                url: "mem://data/r/r.hrc".to_string(),
                root_name: "r".to_string(),
            })
        );
        let PayloadDecoder::Binary { params, .. } = plan.decoder else {
            panic!("expected the binary decoder");
        };
        assert_eq!(params.offset, DVec3::ZERO);
    }

    #[test]
    fn decoder_frames() {
        let old = cloud(Version::new(1, 3), positions_only(), 0);
        let plan = LoadPlan::new(&old, old.root_id()).unwrap();
        assert!(plan.hierarchy.is_none());
        assert_eq!(plan.url, "mem://data/r");

        let las = cloud(Version::new(1, 7), PointFormat::Las, 5);
        let plan = LoadPlan::new(&las, las.root_id()).unwrap();
        let PayloadDecoder::Las { translation } = plan.decoder else {
            panic!("expected the LAS decoder");
        };
        assert_eq!(translation, DVec3::new(-100.0, 0.0, 0.0));
        assert_eq!(plan.url, "mem://data/r/r.las");
    }

    #[test]
    fn execute_decodes_quantized_payload() {
        let mut cloud = cloud(Version::new(1, 7), positions_only(), 5);
        cloud
            .apply_hierarchy(&[
                HierarchyEntry { name: "r".into(), child_mask: 0b1000_0000, num_points: 0 },
                HierarchyEntry { name: "r7".into(), child_mask: 0, num_points: 2 },
            ])
            .unwrap();
        let r7 = cloud.node_id("r7").unwrap();

        let client = MemoryClient::new();
        let payload: Vec<u8> = [[0u32, 0, 0], [2, 4, 6]]
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        client.insert("mem://data/r/r7.bin", payload);

        let plan = LoadPlan::new(&cloud, r7).unwrap();
        assert!(plan.hierarchy.is_none());
        let (hierarchy, batch) = block_on(plan.execute(&client, false)).unwrap();
        assert!(hierarchy.is_none());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.origin, DVec3::splat(4.0));
        assert_eq!(batch.positions[1], glam::Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn execute_reports_transport_errors() {
        let cloud = cloud(Version::new(1, 3), positions_only(), 0);
        let plan = LoadPlan::new(&cloud, cloud.root_id()).unwrap();
        let client = MemoryClient::new();
        assert!(matches!(
            block_on(plan.execute(&client, false)),
            Err(LoadError::Resource(_))
        ));
    }
}
