//! 关节层级 - arena + 代数句柄
//!
//! JointArena 持有全部关节，父子关系只是句柄。
//! 全局变换在读取时惰性重算：
//! local_to_world = parent.local_to_world * local_to_parent

use glam::{Mat4, Vec3};

use super::joint::{orthogonalize, validate_matrix, Joint, JointFlags};
use super::JointId;
use crate::config::get_config;
use crate::{EwbikError, Result};

// ============================================================================
// 层级限制
// ============================================================================

/// 层级校验限制
#[derive(Clone, Copy, Debug)]
pub struct HierarchyLimits {
    /// 最大深度（根为 0）
    pub max_depth: usize,
    /// 单节点最大子节点数
    pub max_children: usize,
    /// 矩阵元素最大绝对值
    pub max_magnitude: f32,
}

impl Default for HierarchyLimits {
    fn default() -> Self {
        let config = get_config();
        Self {
            max_depth: config.max_hierarchy_depth,
            max_children: config.max_children,
            max_magnitude: config.max_transform_magnitude,
        }
    }
}

// ============================================================================
// Arena
// ============================================================================

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    joint: Option<Joint>,
}

/// 关节 arena
///
/// 全局变换缓存使用 `Cell`，因此同一骨骼实例只应在单个线程中使用。
/// 并行求解时先把链快照为纯数据再分发。
#[derive(Clone, Debug, Default)]
pub struct JointArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    limits: HierarchyLimits,
}

impl JointArena {
    /// 创建空 arena（使用全局配置中的限制）
    pub fn new() -> Self {
        Self::with_limits(HierarchyLimits::default())
    }

    pub fn with_limits(limits: HierarchyLimits) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            limits,
        }
    }

    #[inline]
    pub fn limits(&self) -> HierarchyLimits {
        self.limits
    }

    /// 从扁平节点列表导入（glTF/FBX 节点表等纯数据）
    ///
    /// `parents[i]` 可以引用任意位置的节点，先全部创建为根再挂接。
    pub fn from_parent_indices(
        names: &[String],
        parents: &[Option<usize>],
        locals: &[Mat4],
    ) -> Result<(Self, Vec<JointId>)> {
        if names.len() != parents.len() || names.len() != locals.len() {
            return Err(EwbikError::InvalidNode(format!(
                "node table length mismatch: {} names, {} parents, {} transforms",
                names.len(),
                parents.len(),
                locals.len()
            )));
        }

        let mut arena = Self::new();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(arena.create(name.clone(), None)?);
        }

        for (i, parent) in parents.iter().enumerate() {
            if let Some(p) = *parent {
                let parent_id = *ids.get(p).ok_or_else(|| {
                    EwbikError::InvalidNode(format!("node {} references missing parent {}", i, p))
                })?;
                arena.set_parent(ids[i], Some(parent_id))?;
            }
        }

        for (id, local) in ids.iter().zip(locals) {
            arena.set_local_transform(*id, *local)?;
        }

        Ok((arena, ids))
    }

    // ========================================
    // 创建 / 销毁
    // ========================================

    /// 创建关节，可选父关节；本地/全局变换初始化为单位矩阵
    pub fn create(&mut self, name: impl Into<String>, parent: Option<JointId>) -> Result<JointId> {
        if let Some(parent_id) = parent {
            let parent_joint = self.joint(parent_id)?;
            let count = parent_joint.children.len() + 1;
            if count > self.limits.max_children {
                return Err(EwbikError::TooManyChildren {
                    count,
                    limit: self.limits.max_children,
                });
            }
            let depth = self.depth(parent_id)? + 1;
            if depth > self.limits.max_depth {
                return Err(EwbikError::HierarchyTooDeep {
                    depth,
                    limit: self.limits.max_depth,
                });
            }
        }

        let mut joint = Joint::new(name.into());
        joint.parent = parent;

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.joint = Some(joint);
                JointId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, joint: Some(joint) });
                JointId { index, generation: 0 }
            }
        };

        if let Some(parent_id) = parent {
            self.joint_mut(parent_id)?.children.push(id);
        }
        Ok(id)
    }

    /// 销毁关节：断开与父节点的连接，子节点成为根
    pub fn destroy(&mut self, id: JointId) -> Result<()> {
        let joint = self.joint(id)?;
        let parent = joint.parent;
        let children = joint.children.clone();

        if let Some(parent_id) = parent {
            if let Ok(p) = self.joint_mut(parent_id) {
                p.children.retain(|c| *c != id);
            }
        }
        for child in children {
            if let Ok(c) = self.joint_mut(child) {
                c.parent = None;
            }
            self.mark_subtree_dirty(child);
        }

        let slot = &mut self.slots[id.index()];
        slot.joint = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    // ========================================
    // 查询
    // ========================================

    #[inline]
    pub fn get(&self, id: JointId) -> Option<&Joint> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.joint.as_ref())
    }

    #[inline]
    pub fn contains(&self, id: JointId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.joint.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有存活关节句柄（按槽位顺序）
    pub fn ids(&self) -> impl Iterator<Item = JointId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.joint.as_ref().map(|_| JointId {
                index: i as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn name(&self, id: JointId) -> Option<&str> {
        self.get(id).map(|j| j.name.as_str())
    }

    pub fn find_by_name(&self, name: &str) -> Option<JointId> {
        self.ids().find(|id| self.name(*id) == Some(name))
    }

    pub fn parent(&self, id: JointId) -> Result<Option<JointId>> {
        Ok(self.joint(id)?.parent)
    }

    pub fn children(&self, id: JointId) -> Result<&[JointId]> {
        Ok(&self.joint(id)?.children)
    }

    pub fn roots(&self) -> Vec<JointId> {
        self.ids().filter(|id| self.get(*id).is_some_and(|j| j.is_root())).collect()
    }

    /// 深度（根为 0），祖先遍历受 max_depth 限制
    pub fn depth(&self, id: JointId) -> Result<usize> {
        let mut depth = 0;
        let mut current = self.joint(id)?.parent;
        while let Some(parent_id) = current {
            depth += 1;
            if depth > self.limits.max_depth {
                return Err(EwbikError::HierarchyTooDeep {
                    depth,
                    limit: self.limits.max_depth,
                });
            }
            current = self.joint(parent_id)?.parent;
        }
        Ok(depth)
    }

    /// 所有后代（深度优先，不含自身）
    pub fn descendants(&self, id: JointId) -> Result<Vec<JointId>> {
        let mut result = Vec::new();
        let mut stack: Vec<JointId> = self.joint(id)?.children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(joint) = self.get(current) {
                stack.extend(joint.children.iter().rev().copied());
            }
        }
        Ok(result)
    }

    /// `ancestor` 是否为 `id` 的祖先（或自身）
    pub fn is_ancestor_or_self(&self, ancestor: JointId, id: JointId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.limits.max_depth + 1 {
                return false;
            }
            current = self.get(c).and_then(|j| j.parent);
        }
        false
    }

    // ========================================
    // 变换
    // ========================================

    pub fn local_transform(&self, id: JointId) -> Result<Mat4> {
        Ok(self.joint(id)?.local_transform)
    }

    /// 设置本地变换；与当前值逐位相同时不做任何事
    pub fn set_local_transform(&mut self, id: JointId, transform: Mat4) -> Result<()> {
        self.check_transform(&transform)?;
        let joint = self.joint_mut(id)?;
        let unchanged = joint
            .local_transform
            .to_cols_array()
            .iter()
            .zip(transform.to_cols_array().iter())
            .all(|(a, b)| a.to_bits() == b.to_bits());
        if unchanged {
            return Ok(());
        }
        joint.local_transform = transform;
        self.mark_subtree_dirty(id);
        Ok(())
    }

    /// 获取全局变换（脏时沿祖先链重算并缓存）
    pub fn global_transform(&self, id: JointId) -> Result<Mat4> {
        let joint = self.joint(id)?;
        if !joint.dirty.get() {
            return Ok(joint.global_cache.get());
        }

        // 收集到第一个干净祖先为止
        let mut path = vec![id];
        let mut base = Mat4::IDENTITY;
        let mut current = joint.parent;
        while let Some(parent_id) = current {
            let parent = self.joint(parent_id)?;
            if !parent.dirty.get() {
                base = parent.global_cache.get();
                break;
            }
            path.push(parent_id);
            if path.len() > self.limits.max_depth + 1 {
                return Err(EwbikError::HierarchyTooDeep {
                    depth: path.len() - 1,
                    limit: self.limits.max_depth,
                });
            }
            current = parent.parent;
        }

        let mut global = base;
        for joint_id in path.iter().rev() {
            let j = self.joint(*joint_id)?;
            global *= j.local_transform;
            if j.disable_scale() {
                global = orthogonalize(global);
            }
            j.global_cache.set(global);
            j.dirty.set(false);
        }
        Ok(global)
    }

    /// 设置全局变换：非根关节反推本地变换
    pub fn set_global_transform(&mut self, id: JointId, transform: Mat4) -> Result<()> {
        self.check_transform(&transform)?;
        let local = match self.joint(id)?.parent {
            None => transform,
            Some(parent_id) => self.global_transform(parent_id)?.inverse() * transform,
        };
        self.set_local_transform(id, local)
    }

    /// 世界空间点 → 关节空间
    pub fn to_local(&self, id: JointId, point: Vec3) -> Result<Vec3> {
        let global = self.global_transform(id)?;
        if global == Mat4::IDENTITY {
            return Ok(point);
        }
        Ok(global.inverse().transform_point3(point))
    }

    /// 关节空间点 → 世界空间
    pub fn to_global(&self, id: JointId, point: Vec3) -> Result<Vec3> {
        let global = self.global_transform(id)?;
        if global == Mat4::IDENTITY {
            return Ok(point);
        }
        Ok(global.transform_point3(point))
    }

    /// 世界位置
    pub fn world_position(&self, id: JointId) -> Result<Vec3> {
        Ok(self.global_transform(id)?.col(3).truncate())
    }

    // ========================================
    // 层级修改
    // ========================================

    /// 重新挂接父关节；新父节点为自身或后代时返回 CircularDependency
    pub fn set_parent(&mut self, id: JointId, new_parent: Option<JointId>) -> Result<()> {
        let old_parent = self.joint(id)?.parent;

        if let Some(parent_id) = new_parent {
            self.joint(parent_id)?;

            if self.is_ancestor_or_self(id, parent_id) {
                return Err(EwbikError::CircularDependency(format!(
                    "joint {} cannot become a child of its descendant {}",
                    id, parent_id
                )));
            }

            if old_parent != Some(parent_id) {
                let count = self.joint(parent_id)?.children.len() + 1;
                if count > self.limits.max_children {
                    return Err(EwbikError::TooManyChildren {
                        count,
                        limit: self.limits.max_children,
                    });
                }
            }

            let depth = self.depth(parent_id)? + 1 + self.subtree_height(id)?;
            if depth > self.limits.max_depth {
                return Err(EwbikError::HierarchyTooDeep {
                    depth,
                    limit: self.limits.max_depth,
                });
            }
        }

        if old_parent == new_parent {
            return Ok(());
        }

        if let Some(old_id) = old_parent {
            if let Ok(old) = self.joint_mut(old_id) {
                old.children.retain(|c| *c != id);
            }
        }
        if let Some(parent_id) = new_parent {
            self.joint_mut(parent_id)?.children.push(id);
        }
        self.joint_mut(id)?.parent = new_parent;
        self.mark_subtree_dirty(id);
        Ok(())
    }

    /// 启用后全局变换读取时去除缩放
    pub fn set_disable_scale(&mut self, id: JointId, disable: bool) -> Result<()> {
        let joint = self.joint_mut(id)?;
        joint.flags.set(JointFlags::DISABLE_SCALE, disable);
        self.mark_subtree_dirty(id);
        Ok(())
    }

    /// 是否允许 IK 旋转该关节
    pub fn set_rotatable(&mut self, id: JointId, rotatable: bool) -> Result<()> {
        self.joint_mut(id)?.flags.set(JointFlags::ROTATABLE, rotatable);
        Ok(())
    }

    // ========================================
    // 内部
    // ========================================

    pub(crate) fn joint(&self, id: JointId) -> Result<&Joint> {
        self.get(id)
            .ok_or_else(|| EwbikError::InvalidNode(format!("joint {} does not exist", id)))
    }

    fn joint_mut(&mut self, id: JointId) -> Result<&mut Joint> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.joint.as_mut())
            .ok_or_else(|| EwbikError::InvalidNode(format!("joint {} does not exist", id)))
    }

    fn check_transform(&self, m: &Mat4) -> Result<()> {
        if validate_matrix(m, self.limits.max_magnitude) {
            Ok(())
        } else {
            Err(EwbikError::InvalidTransform(format!(
                "matrix contains non-finite or out-of-range elements (limit {:e})",
                self.limits.max_magnitude
            )))
        }
    }

    /// 子树高度（叶为 0）
    fn subtree_height(&self, id: JointId) -> Result<usize> {
        let mut height = 0;
        let mut stack = vec![(id, 0usize)];
        while let Some((current, level)) = stack.pop() {
            height = height.max(level);
            if level > self.limits.max_depth {
                break;
            }
            for child in &self.joint(current)?.children {
                stack.push((*child, level + 1));
            }
        }
        Ok(height)
    }

    fn mark_subtree_dirty(&self, id: JointId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(joint) = self.get(current) {
                joint.mark_dirty();
                stack.extend(joint.children.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn three_chain() -> (JointArena, JointId, JointId, JointId) {
        let mut arena = JointArena::new();
        let root = arena.create("root", None).unwrap();
        let middle = arena.create("middle", Some(root)).unwrap();
        let leaf = arena.create("leaf", Some(middle)).unwrap();
        (arena, root, middle, leaf)
    }

    #[test]
    fn test_identity_local_inherits_parent_global() {
        let (mut arena, root, middle, _) = three_chain();
        let m = Mat4::from_rotation_translation(Quat::from_rotation_z(0.3), Vec3::new(1.0, 2.0, 3.0));
        arena.set_local_transform(root, m).unwrap();
        assert_eq!(arena.global_transform(middle).unwrap(), arena.global_transform(root).unwrap());
        assert_eq!(arena.global_transform(root).unwrap(), m);
    }

    #[test]
    fn test_dirty_propagation() {
        let (mut arena, root, middle, leaf) = three_chain();
        arena.set_local_transform(middle, Mat4::from_translation(Vec3::Y)).unwrap();
        assert!((arena.world_position(leaf).unwrap() - Vec3::Y).length() < 1e-6);

        // 修改祖先后叶节点缓存失效
        arena.set_local_transform(root, Mat4::from_translation(Vec3::X)).unwrap();
        assert!((arena.world_position(leaf).unwrap() - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_identical_local_keeps_cache_clean() {
        let (mut arena, root, _, leaf) = three_chain();
        let m = Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::new(0.0, 2.0, 0.0));
        arena.set_local_transform(root, m).unwrap();
        arena.global_transform(leaf).unwrap();
        assert!(!arena.get(leaf).unwrap().dirty.get());

        arena.set_local_transform(root, m).unwrap();
        assert!(!arena.get(root).unwrap().dirty.get());
        assert!(!arena.get(leaf).unwrap().dirty.get());

        // 任何一位不同都会让子树失效
        arena.set_local_transform(root, m * Mat4::from_translation(Vec3::X)).unwrap();
        assert!(arena.get(leaf).unwrap().dirty.get());
    }

    #[test]
    fn test_point_round_trip() {
        let (mut arena, root, middle, leaf) = three_chain();
        arena
            .set_local_transform(root, Mat4::from_rotation_translation(Quat::from_rotation_x(0.7), Vec3::new(0.0, 1.0, 0.0)))
            .unwrap();
        arena
            .set_local_transform(middle, Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::from_rotation_y(1.1), Vec3::Z))
            .unwrap();
        let p = Vec3::new(0.3, -2.0, 5.0);
        let back = arena.to_local(leaf, arena.to_global(leaf, p).unwrap()).unwrap();
        assert!((back - p).length() < 1e-4);
    }

    #[test]
    fn test_identity_point_conversion_is_exact() {
        let (arena, _, _, leaf) = three_chain();
        let p = Vec3::new(0.1, 0.2, 0.3);
        assert_eq!(arena.to_global(leaf, p).unwrap(), p);
        assert_eq!(arena.to_local(leaf, p).unwrap(), p);
    }

    #[test]
    fn test_set_global_transform() {
        let (mut arena, root, middle, _) = three_chain();
        arena.set_local_transform(root, Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))).unwrap();
        let target = Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::new(1.0, 1.0, 1.0));
        arena.set_global_transform(middle, target).unwrap();
        let global = arena.global_transform(middle).unwrap();
        assert!(global.abs_diff_eq(target, 1e-5));
    }

    #[test]
    fn test_circular_dependency_rejected() {
        let (mut arena, root, middle, leaf) = three_chain();
        let before_root = arena.get(root).unwrap().children().to_vec();
        let before_leaf_parent = arena.parent(leaf).unwrap();

        let err = arena.set_parent(root, Some(leaf)).unwrap_err();
        assert!(matches!(err, EwbikError::CircularDependency(_)));
        assert!(matches!(arena.set_parent(middle, Some(middle)), Err(EwbikError::CircularDependency(_))));

        assert_eq!(arena.get(root).unwrap().children(), before_root.as_slice());
        assert_eq!(arena.parent(leaf).unwrap(), before_leaf_parent);
        assert_eq!(arena.parent(root).unwrap(), None);
    }

    #[test]
    fn test_reparent_updates_children() {
        let (mut arena, root, middle, leaf) = three_chain();
        arena.set_parent(leaf, Some(root)).unwrap();
        assert_eq!(arena.children(root).unwrap(), &[middle, leaf]);
        assert!(arena.children(middle).unwrap().is_empty());
        arena.set_parent(leaf, None).unwrap();
        assert_eq!(arena.roots(), vec![root, leaf]);
    }

    #[test]
    fn test_depth_limit() {
        let mut arena = JointArena::with_limits(HierarchyLimits {
            max_depth: 2,
            max_children: 10,
            max_magnitude: 1e12,
        });
        let a = arena.create("a", None).unwrap();
        let b = arena.create("b", Some(a)).unwrap();
        let c = arena.create("c", Some(b)).unwrap();
        let err = arena.create("d", Some(c)).unwrap_err();
        assert_eq!(err, EwbikError::HierarchyTooDeep { depth: 3, limit: 2 });

        // 挂接整棵子树也要检查深度
        let x = arena.create("x", None).unwrap();
        arena.create("y", Some(x)).unwrap();
        assert!(matches!(arena.set_parent(x, Some(b)), Err(EwbikError::HierarchyTooDeep { .. })));
    }

    #[test]
    fn test_children_limit() {
        let mut arena = JointArena::with_limits(HierarchyLimits {
            max_depth: 10,
            max_children: 2,
            max_magnitude: 1e12,
        });
        let root = arena.create("root", None).unwrap();
        arena.create("a", Some(root)).unwrap();
        arena.create("b", Some(root)).unwrap();
        let err = arena.create("c", Some(root)).unwrap_err();
        assert_eq!(err, EwbikError::TooManyChildren { count: 3, limit: 2 });
    }

    #[test]
    fn test_invalid_transform() {
        let (mut arena, root, _, _) = three_chain();
        let bad = Mat4::from_translation(Vec3::new(f32::INFINITY, 0.0, 0.0));
        assert!(matches!(arena.set_local_transform(root, bad), Err(EwbikError::InvalidTransform(_))));
        let huge = Mat4::from_translation(Vec3::new(1.0e13, 0.0, 0.0));
        assert!(matches!(arena.set_local_transform(root, huge), Err(EwbikError::InvalidTransform(_))));
    }

    #[test]
    fn test_disable_scale() {
        let (mut arena, root, middle, _) = three_chain();
        arena.set_local_transform(root, Mat4::from_scale(Vec3::splat(3.0))).unwrap();
        arena.set_local_transform(middle, Mat4::from_translation(Vec3::X)).unwrap();
        assert!((arena.world_position(middle).unwrap() - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);

        arena.set_disable_scale(root, true).unwrap();
        let root_global = arena.global_transform(root).unwrap();
        assert!((root_global.col(0).truncate().length() - 1.0).abs() < 1e-6);
        assert!((arena.world_position(middle).unwrap() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn test_destroy_invalidates_handle() {
        let (mut arena, root, middle, leaf) = three_chain();
        arena.destroy(middle).unwrap();
        assert!(!arena.contains(middle));
        assert!(arena.children(root).unwrap().is_empty());
        assert_eq!(arena.parent(leaf).unwrap(), None);

        // 槽位复用后旧句柄仍然无效
        let fresh = arena.create("fresh", None).unwrap();
        assert_eq!(fresh.index(), middle.index());
        assert!(matches!(arena.local_transform(middle), Err(EwbikError::InvalidNode(_))));
    }

    #[test]
    fn test_from_parent_indices() {
        let names: Vec<String> = ["leaf", "root", "middle"].iter().map(|s| s.to_string()).collect();
        let parents = [Some(2), None, Some(1)];
        let locals = [Mat4::from_translation(Vec3::Y); 3];
        let (arena, ids) = JointArena::from_parent_indices(&names, &parents, &locals).unwrap();
        assert_eq!(arena.parent(ids[0]).unwrap(), Some(ids[2]));
        assert!((arena.world_position(ids[0]).unwrap() - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-6);

        let cyclic = [Some(1), Some(0), None];
        assert!(matches!(
            JointArena::from_parent_indices(&names, &cyclic, &locals),
            Err(EwbikError::CircularDependency(_))
        ));
    }
}
