//! 拓扑查询
//!
//! 环遍历全部带重访保护：指针损坏时返回已收集部分，不会死循环。

use std::collections::HashSet;

use super::{BMesh, EdgeId, Face, FaceId, LoopId, VertexId};

impl BMesh {
    /// 连接两个顶点的边（与方向无关）
    pub fn find_edge(&self, a: VertexId, b: VertexId) -> Option<EdgeId> {
        let vertex = self.vertices.get(&a)?;
        vertex
            .edges
            .iter()
            .copied()
            .find(|e| self.edges.get(e).is_some_and(|edge| edge.connects(a, b)))
    }

    pub fn vertex_edges(&self, vertex: VertexId) -> Vec<EdgeId> {
        self.vertices
            .get(&vertex)
            .map(|v| v.edges.clone())
            .unwrap_or_default()
    }

    /// 包含该顶点的面（按 ID 排序，无重复）
    pub fn vertex_faces(&self, vertex: VertexId) -> Vec<FaceId> {
        let mut faces: Vec<FaceId> = self
            .vertex_edges(vertex)
            .iter()
            .filter_map(|e| self.edges.get(e))
            .flat_map(|e| e.faces.iter().copied())
            .filter(|f| self.faces.get(f).is_some_and(|face| face.vertices.contains(&vertex)))
            .collect();
        faces.sort_unstable();
        faces.dedup();
        faces
    }

    pub fn edge_other_vertex(&self, edge: EdgeId, vertex: VertexId) -> Option<VertexId> {
        let (a, b) = self.edges.get(&edge)?.vertices;
        if a == vertex {
            Some(b)
        } else if b == vertex {
            Some(a)
        } else {
            None
        }
    }

    /// 径向环上引用该边的所有 loop（非流形边可多于 2 个）
    pub fn edge_loops(&self, edge: EdgeId) -> Vec<LoopId> {
        let Some(entry) = self.edges.get(&edge).and_then(|e| e.loop_entry) else {
            return Vec::new();
        };

        let mut loops = Vec::new();
        let mut visited = HashSet::new();
        let mut current = entry;
        while visited.insert(current) {
            let Some(l) = self.loops.get(&current) else {
                break;
            };
            if l.edge == edge {
                loops.push(current);
            }
            current = l.radial_next;
        }
        if current != entry {
            log::warn!("[BMesh] 边 {} 的径向环损坏，已截断于 {}", edge, loops.len());
        }
        loops
    }

    /// 边记录的相邻面；已不存在的面 ID 静默跳过
    pub fn edge_faces(&self, edge: EdgeId) -> Vec<&Face> {
        self.edges
            .get(&edge)
            .map(|e| e.faces.iter().filter_map(|f| self.faces.get(f)).collect())
            .unwrap_or_default()
    }

    /// 面的 loop（沿 next 顺序）；环损坏时返回已收集部分
    pub fn face_loops(&self, face: FaceId) -> Vec<LoopId> {
        let Some(first) = self.faces.get(&face).and_then(|f| f.loops.first().copied()) else {
            return Vec::new();
        };

        let mut loops = Vec::new();
        let mut visited = HashSet::new();
        let mut current = first;
        while visited.insert(current) {
            let Some(l) = self.loops.get(&current) else {
                break;
            };
            loops.push(current);
            current = l.next;
        }
        if current != first {
            log::warn!(
                "[BMesh] 面 {} 的 loop 环在 {} 处中断，返回 {} 个面角",
                face,
                current,
                loops.len()
            );
        }
        loops
    }

    pub fn face_vertices_ordered(&self, face: FaceId) -> Vec<VertexId> {
        self.face_loops(face)
            .iter()
            .filter_map(|l| self.loops.get(l).map(|l| l.vertex))
            .collect()
    }

    #[inline]
    fn recorded_face_count(&self, edge: EdgeId) -> usize {
        self.edges.get(&edge).map_or(0, |e| e.faces.len())
    }

    /// 恰好两个相邻面
    pub fn is_edge_manifold(&self, edge: EdgeId) -> bool {
        self.recorded_face_count(edge) == 2
    }

    /// 恰好一个相邻面
    pub fn is_edge_boundary(&self, edge: EdgeId) -> bool {
        self.recorded_face_count(edge) == 1
    }

    /// 多于两个相邻面
    pub fn is_edge_non_manifold(&self, edge: EdgeId) -> bool {
        self.recorded_face_count(edge) > 2
    }

    pub fn boundary_edges(&self) -> Vec<EdgeId> {
        self.edges.keys().copied().filter(|e| self.is_edge_boundary(*e)).collect()
    }

    pub fn non_manifold_edges(&self) -> Vec<EdgeId> {
        self.edges.keys().copied().filter(|e| self.is_edge_non_manifold(*e)).collect()
    }

    /// 所有带面的边都不超过两个相邻面
    pub fn is_manifold(&self) -> bool {
        self.non_manifold_edges().is_empty()
    }
}
