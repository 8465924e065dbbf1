//! BMesh 网格拓扑
//!
//! 核心设计思想：
//! - 顶点 / 边 / 环（loop）/ 面 四张有序表，元素间只存 ID
//! - 同一面的 loop 通过 next/prev 成环
//! - 共用一条边的 loop 通过 radial_next/radial_prev 成环（支持非流形）
//! - ID 单调递增，网格生命周期内不复用

mod bmesh;
mod builder;
mod topology;

pub use bmesh::{AttributeValue, Attributes, BMesh, Edge, Face, Loop, Vertex};

use std::fmt;

macro_rules! element_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline]
            pub fn index(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

element_id!(
    /// 顶点 ID
    VertexId,
    "v"
);
element_id!(
    /// 边 ID
    EdgeId,
    "e"
);
element_id!(
    /// 面角（loop）ID
    LoopId,
    "l"
);
element_id!(
    /// 面 ID
    FaceId,
    "f"
);
