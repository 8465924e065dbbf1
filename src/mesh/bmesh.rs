//! BMesh 存储与元素分配

use std::collections::{BTreeMap, HashSet};

use glam::{Vec2, Vec3, Vec4};

use super::{EdgeId, FaceId, LoopId, VertexId};
use crate::{EwbikError, Result};

// ============================================================================
// 属性
// ============================================================================

/// 元素属性值（UV、颜色、材质索引等）
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Text(String),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

// ============================================================================
// 元素
// ============================================================================

#[derive(Clone, Debug)]
pub struct Vertex {
    pub id: VertexId,
    pub position: Vec3,
    pub attributes: Attributes,
    /// 相邻边（无重复）
    pub(crate) edges: Vec<EdgeId>,
}

impl Vertex {
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    pub attributes: Attributes,
    /// 无序端点对
    pub(crate) vertices: (VertexId, VertexId),
    pub(crate) faces: Vec<FaceId>,
    /// 径向环入口
    pub(crate) loop_entry: Option<LoopId>,
}

impl Edge {
    pub fn vertices(&self) -> (VertexId, VertexId) {
        self.vertices
    }

    pub fn faces(&self) -> &[FaceId] {
        &self.faces
    }

    pub fn loop_entry(&self) -> Option<LoopId> {
        self.loop_entry
    }

    pub fn connects(&self, a: VertexId, b: VertexId) -> bool {
        self.vertices == (a, b) || self.vertices == (b, a)
    }
}

/// 面角：面上的一个顶点及其出边
#[derive(Clone, Debug)]
pub struct Loop {
    pub id: LoopId,
    pub attributes: Attributes,
    pub(crate) vertex: VertexId,
    pub(crate) edge: EdgeId,
    pub(crate) face: FaceId,
    pub(crate) next: LoopId,
    pub(crate) prev: LoopId,
    pub(crate) radial_next: LoopId,
    pub(crate) radial_prev: LoopId,
}

impl Loop {
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    pub fn face(&self) -> FaceId {
        self.face
    }

    pub fn next(&self) -> LoopId {
        self.next
    }

    pub fn prev(&self) -> LoopId {
        self.prev
    }

    pub fn radial_next(&self) -> LoopId {
        self.radial_next
    }

    pub fn radial_prev(&self) -> LoopId {
        self.radial_prev
    }
}

#[derive(Clone, Debug)]
pub struct Face {
    pub id: FaceId,
    pub normal: Vec3,
    pub attributes: Attributes,
    pub(crate) vertices: Vec<VertexId>,
    pub(crate) edges: Vec<EdgeId>,
    pub(crate) loops: Vec<LoopId>,
}

impl Face {
    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn loops(&self) -> &[LoopId] {
        &self.loops
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

// ============================================================================
// BMesh
// ============================================================================

/// 半边网格
#[derive(Clone, Debug, Default)]
pub struct BMesh {
    pub(crate) vertices: BTreeMap<VertexId, Vertex>,
    pub(crate) edges: BTreeMap<EdgeId, Edge>,
    pub(crate) loops: BTreeMap<LoopId, Loop>,
    pub(crate) faces: BTreeMap<FaceId, Face>,
    next_vertex: u32,
    next_edge: u32,
    next_loop: u32,
    next_face: u32,
}

impl BMesh {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 查询
    // ========================================

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(&id)
    }

    pub fn get_loop(&self, id: LoopId) -> Option<&Loop> {
        self.loops.get(&id)
    }

    pub fn loop_mut(&mut self, id: LoopId) -> Option<&mut Loop> {
        self.loops.get_mut(&id)
    }

    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(&id)
    }

    pub fn face_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        self.faces.get_mut(&id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn faces(&self) -> impl Iterator<Item = &Face> {
        self.faces.values()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    // ========================================
    // 分配
    // ========================================

    pub fn add_vertex(&mut self, position: Vec3) -> VertexId {
        let id = VertexId(self.next_vertex);
        self.next_vertex += 1;
        self.vertices.insert(
            id,
            Vertex {
                id,
                position,
                attributes: Attributes::new(),
                edges: Vec::new(),
            },
        );
        id
    }

    /// 添加边并登记到两个端点（去重）
    pub fn add_edge(&mut self, a: VertexId, b: VertexId) -> Result<EdgeId> {
        self.require_vertex(a)?;
        self.require_vertex(b)?;
        if a == b {
            return Err(EwbikError::InvalidElement(format!("degenerate edge {a}-{b}")));
        }

        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(
            id,
            Edge {
                id,
                attributes: Attributes::new(),
                vertices: (a, b),
                faces: Vec::new(),
                loop_entry: None,
            },
        );
        for v in [a, b] {
            if let Some(vertex) = self.vertices.get_mut(&v) {
                if !vertex.edges.contains(&id) {
                    vertex.edges.push(id);
                }
            }
        }
        Ok(id)
    }

    /// 在面的 loop 环末尾追加一个面角，并挂到边的径向环上
    ///
    /// 面的顶点、边列表同步追加，边记录该面。
    pub fn add_loop(&mut self, vertex: VertexId, edge: EdgeId, face: FaceId) -> Result<LoopId> {
        self.require_vertex(vertex)?;
        let radial_entry = self
            .edges
            .get(&edge)
            .ok_or_else(|| EwbikError::InvalidElement(format!("edge {edge} not found")))?
            .loop_entry;
        let (first, last) = {
            let f = self
                .faces
                .get(&face)
                .ok_or_else(|| EwbikError::InvalidElement(format!("face {face} not found")))?;
            (f.loops.first().copied(), f.loops.last().copied())
        };

        let id = LoopId(self.next_loop);
        self.next_loop += 1;

        // 面环
        let (next, prev) = match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => (id, id),
        };
        // 径向环：插在入口之后
        let (radial_next, radial_prev) = match radial_entry {
            Some(entry) => match self.loops.get(&entry) {
                Some(entry_loop) => (entry_loop.radial_next, entry),
                None => (id, id),
            },
            None => (id, id),
        };

        self.loops.insert(
            id,
            Loop {
                id,
                attributes: Attributes::new(),
                vertex,
                edge,
                face,
                next,
                prev,
                radial_next,
                radial_prev,
            },
        );

        if next != id {
            if let Some(l) = self.loops.get_mut(&prev) {
                l.next = id;
            }
            if let Some(l) = self.loops.get_mut(&next) {
                l.prev = id;
            }
        }
        if radial_next != id {
            if let Some(l) = self.loops.get_mut(&radial_prev) {
                l.radial_next = id;
            }
            if let Some(l) = self.loops.get_mut(&radial_next) {
                l.radial_prev = id;
            }
        }

        if let Some(e) = self.edges.get_mut(&edge) {
            if e.loop_entry.is_none() || radial_next == id {
                e.loop_entry = Some(id);
            }
            if !e.faces.contains(&face) {
                e.faces.push(face);
            }
        }
        if let Some(f) = self.faces.get_mut(&face) {
            f.loops.push(id);
            f.vertices.push(vertex);
            f.edges.push(edge);
        }
        Ok(id)
    }

    /// 添加面：复用已有边，创建面角环与径向链接，计算法线
    pub fn add_face(&mut self, vertices: &[VertexId]) -> Result<FaceId> {
        if vertices.len() < 3 {
            return Err(EwbikError::InvalidElement(format!(
                "face needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        // 先整体校验，失败时网格不变；顶点不可重复
        let mut seen = HashSet::with_capacity(vertices.len());
        for v in vertices {
            self.require_vertex(*v)?;
            if !seen.insert(*v) {
                return Err(EwbikError::InvalidElement(format!("face repeats vertex {v}")));
            }
        }

        let id = FaceId(self.next_face);
        self.next_face += 1;
        self.faces.insert(
            id,
            Face {
                id,
                normal: Vec3::ZERO,
                attributes: Attributes::new(),
                vertices: Vec::with_capacity(vertices.len()),
                edges: Vec::with_capacity(vertices.len()),
                loops: Vec::with_capacity(vertices.len()),
            },
        );

        for (i, v) in vertices.iter().enumerate() {
            let next = vertices[(i + 1) % vertices.len()];
            let edge = match self.find_edge(*v, next) {
                Some(edge) => edge,
                None => self.add_edge(*v, next)?,
            };
            self.add_loop(*v, edge, id)?;
        }

        self.recalc_face_normal(id);
        Ok(id)
    }

    /// 重新计算面法线（Newell 方法）；退化面为零向量
    pub fn recalc_face_normal(&mut self, face: FaceId) -> Option<Vec3> {
        let normal = {
            let f = self.faces.get(&face)?;
            let points: Vec<Vec3> = f
                .vertices
                .iter()
                .filter_map(|v| self.vertices.get(v).map(|v| v.position))
                .collect();
            newell_normal(&points)
        };
        let f = self.faces.get_mut(&face)?;
        f.normal = normal;
        Some(normal)
    }

    pub(crate) fn require_vertex(&self, id: VertexId) -> Result<()> {
        if self.vertices.contains_key(&id) {
            Ok(())
        } else {
            Err(EwbikError::InvalidElement(format!("vertex {id} not found")))
        }
    }
}

fn newell_normal(points: &[Vec3]) -> Vec3 {
    let mut normal = Vec3::ZERO;
    for (i, current) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }
    normal.normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (BMesh, [VertexId; 4]) {
        let mut mesh = BMesh::new();
        let v = [
            mesh.add_vertex(Vec3::new(0.0, 0.0, 0.0)),
            mesh.add_vertex(Vec3::new(1.0, 0.0, 0.0)),
            mesh.add_vertex(Vec3::new(1.0, 1.0, 0.0)),
            mesh.add_vertex(Vec3::new(0.0, 1.0, 0.0)),
        ];
        (mesh, v)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (mut mesh, v) = quad();
        assert_eq!(v.map(|id| id.index()), [0, 1, 2, 3]);
        let e0 = mesh.add_edge(v[0], v[1]).unwrap();
        let e1 = mesh.add_edge(v[1], v[2]).unwrap();
        assert!(e1 > e0);
    }

    #[test]
    fn test_add_edge_updates_vertices() {
        let (mut mesh, v) = quad();
        let e = mesh.add_edge(v[0], v[1]).unwrap();
        assert_eq!(mesh.vertex(v[0]).unwrap().edges(), &[e]);
        assert_eq!(mesh.vertex(v[1]).unwrap().edges(), &[e]);
        assert!(mesh.vertex(v[2]).unwrap().edges().is_empty());
    }

    #[test]
    fn test_add_edge_rejects_missing_vertex() {
        let (mut mesh, v) = quad();
        let err = mesh.add_edge(v[0], VertexId(99)).unwrap_err();
        assert!(matches!(err, EwbikError::InvalidElement(_)));
        assert!(mesh.add_edge(v[1], v[1]).is_err());
        assert_eq!(mesh.edge_count(), 0);
    }

    #[test]
    fn test_add_face_round_trip() {
        let (mut mesh, v) = quad();
        let f = mesh.add_face(&v).unwrap();
        let face = mesh.face(f).unwrap();
        assert_eq!(face.vertices(), &v);
        assert_eq!(face.edges().len(), 4);
        assert_eq!(face.loops().len(), 4);
        assert!((face.normal - Vec3::Z).length() < 1e-6);
        assert_eq!(mesh.edge_count(), 4);
    }

    #[test]
    fn test_add_face_reuses_edges() {
        let (mut mesh, v) = quad();
        mesh.add_face(&[v[0], v[1], v[2]]).unwrap();
        mesh.add_face(&[v[0], v[2], v[3]]).unwrap();
        // 对角线共享
        assert_eq!(mesh.edge_count(), 5);
        let diagonal = mesh.find_edge(v[2], v[0]).unwrap();
        assert_eq!(mesh.edge(diagonal).unwrap().faces().len(), 2);
    }

    #[test]
    fn test_add_face_validation() {
        let (mut mesh, v) = quad();
        assert!(mesh.add_face(&v[..2]).is_err());
        assert!(mesh.add_face(&[v[0], v[1], VertexId(42)]).is_err());
        assert!(mesh.add_face(&[v[0], v[0], v[1]]).is_err());
        // 非相邻重复
        assert!(mesh.add_face(&[v[0], v[1], v[0], v[2]]).is_err());
        assert_eq!(mesh.face_count(), 0);
        assert_eq!(mesh.edge_count(), 0);
    }

    #[test]
    fn test_add_loop_requires_face() {
        let (mut mesh, v) = quad();
        let e = mesh.add_edge(v[0], v[1]).unwrap();
        assert!(mesh.add_loop(v[0], e, FaceId(7)).is_err());
        assert_eq!(mesh.loop_count(), 0);
    }

    #[test]
    fn test_attributes() {
        let (mut mesh, v) = quad();
        let f = mesh.add_face(&v).unwrap();
        mesh.vertex_mut(v[0])
            .unwrap()
            .attributes
            .insert("uv".into(), AttributeValue::Vec2(Vec2::new(0.5, 0.5)));
        mesh.face_mut(f)
            .unwrap()
            .attributes
            .insert("material".into(), AttributeValue::Int(3));
        assert_eq!(
            mesh.vertex(v[0]).unwrap().attributes.get("uv"),
            Some(&AttributeValue::Vec2(Vec2::new(0.5, 0.5)))
        );
        assert_eq!(mesh.face(f).unwrap().attributes["material"], AttributeValue::Int(3));
    }
}
