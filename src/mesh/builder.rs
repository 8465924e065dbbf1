//! 索引多边形导入与三角化导出

use std::collections::HashMap;

use glam::Vec3;

use super::{BMesh, FaceId, VertexId};
use crate::config::get_config;
use crate::{EwbikError, Result};

impl BMesh {
    /// 从顶点位置与索引多边形构建网格，面的顺序与输入一致
    pub fn from_polygons(positions: &[Vec3], polygons: &[Vec<usize>]) -> Result<Self> {
        let mut mesh = BMesh::new();
        let vertices: Vec<VertexId> = positions.iter().map(|p| mesh.add_vertex(*p)).collect();

        for (i, polygon) in polygons.iter().enumerate() {
            let corners = polygon
                .iter()
                .map(|index| {
                    vertices.get(*index).copied().ok_or_else(|| {
                        EwbikError::InvalidElement(format!(
                            "polygon {} references vertex {} of {}",
                            i,
                            index,
                            positions.len()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            mesh.add_face(&corners)?;
        }

        if get_config().debug_log {
            log::debug!(
                "[BMesh] 导入完成: {} 顶点, {} 边, {} 面",
                mesh.vertex_count(),
                mesh.edge_count(),
                mesh.face_count()
            );
        }
        Ok(mesh)
    }

    /// 扇形三角化导出：返回紧凑的顶点位置与三角形索引
    pub fn to_triangles(&self) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let mut remap: HashMap<VertexId, u32> = HashMap::with_capacity(self.vertices.len());
        let mut positions = Vec::with_capacity(self.vertices.len());
        for (id, vertex) in &self.vertices {
            remap.insert(*id, positions.len() as u32);
            positions.push(vertex.position);
        }

        let mut triangles = Vec::new();
        for face in self.faces.keys() {
            let corners: Vec<u32> = self
                .face_vertices_ordered(*face)
                .iter()
                .filter_map(|v| remap.get(v).copied())
                .collect();
            if corners.len() < 3 {
                log::warn!("[BMesh] 面 {} 只有 {} 个有效角，跳过", face, corners.len());
                continue;
            }
            for i in 1..corners.len() - 1 {
                triangles.push([corners[0], corners[i], corners[i + 1]]);
            }
        }

        (positions, triangles)
    }

    /// 多边形的面积（按扇形三角化累加）
    pub fn face_area(&self, face: FaceId) -> f32 {
        let points: Vec<Vec3> = self
            .face_vertices_ordered(face)
            .iter()
            .filter_map(|v| self.vertices.get(v).map(|v| v.position))
            .collect();
        if points.len() < 3 {
            return 0.0;
        }
        let mut sum = Vec3::ZERO;
        for i in 1..points.len() - 1 {
            sum += (points[i] - points[0]).cross(points[i + 1] - points[0]);
        }
        sum.length() * 0.5
    }
}
