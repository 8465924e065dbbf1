//! 命令行演示：双臂多效应器求解 + 立方体网格拓扑
//!
//! 运行：RUST_LOG=debug cargo run --features demo --bin ik_demo

use ewbik_engine::constraint::{create_cone, create_constraint, set_twist_limits};
use ewbik_engine::{
    get_config, set_config, BMesh, EffectorKind, EffectorTarget, EwbikSolver, JointArena,
    SolverConfig,
};
use glam::{Mat4, Quat, Vec3};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = get_config();
    config.debug_log = log::log_enabled!(log::Level::Debug);
    set_config(config);

    // ========== 骨骼 ==========
    let names: Vec<String> = ["root", "spine", "arm_l", "hand_l", "arm_r", "hand_r"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let parents = [None, Some(0), Some(1), Some(2), Some(1), Some(4)];
    let locals = [
        Mat4::IDENTITY,
        Mat4::from_translation(Vec3::Y),
        Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0)),
        Mat4::from_translation(Vec3::X),
        Mat4::from_translation(Vec3::new(-0.5, 0.0, 0.0)),
        Mat4::from_translation(Vec3::NEG_X),
    ];
    let (mut skeleton, ids) = JointArena::from_parent_indices(&names, &parents, &locals)?;

    let mut solver = EwbikSolver::new(SolverConfig {
        iterations: 40,
        ..SolverConfig::default()
    });
    solver.add_constraint(set_twist_limits(
        create_constraint(ids[1], vec![create_cone(Quat::IDENTITY, 0.3, None)]),
        -20.0,
        20.0,
    ));

    let targets = [
        EffectorTarget::new(ids[3], Vec3::new(1.2, 0.6, 0.6)),
        EffectorTarget::new(ids[5], Vec3::new(-1.0, 1.4, 0.3)).with_kind(EffectorKind::Intermediary),
    ];
    let result = solver.solve_multi(&skeleton, &targets)?;
    EwbikSolver::commit(&mut skeleton, &result.pose)?;

    log::info!("处理顺序: {:?}", result.processing_order.iter().map(|id| skeleton.name(*id)).collect::<Vec<_>>());
    for report in &result.effectors {
        log::info!(
            "效应器 {:?}: 收敛={} 迭代={} 距离={:.4} 位置={:?}",
            skeleton.name(report.effector),
            report.converged,
            report.iterations,
            report.distance,
            skeleton.world_position(report.effector)?
        );
    }

    // ========== 网格 ==========
    let positions = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(1.0, 0.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(0.0, 1.0, 1.0),
    ];
    let polygons = vec![
        vec![0, 3, 2, 1],
        vec![4, 5, 6, 7],
        vec![0, 1, 5, 4],
        vec![1, 2, 6, 5],
        vec![2, 3, 7, 6],
        vec![3, 0, 4, 7],
    ];
    let mut mesh = BMesh::from_polygons(&positions, &polygons)?;
    log::info!(
        "立方体: {} 顶点 / {} 边 / {} 面, 流形={}",
        mesh.vertex_count(),
        mesh.edge_count(),
        mesh.face_count(),
        mesh.is_manifold()
    );

    // 在底边上再挂一片面，构成非流形边
    let fin_tip = mesh.add_vertex(Vec3::new(0.5, -1.0, -0.5));
    let corners: Vec<_> = mesh.vertices().take(2).map(|v| v.id).collect();
    mesh.add_face(&[corners[0], corners[1], fin_tip])?;
    for edge in mesh.non_manifold_edges() {
        log::info!("非流形边 {}: {} 个径向面角", edge, mesh.edge_loops(edge).len());
    }

    let (_, triangles) = mesh.to_triangles();
    log::info!("三角化: {} 个三角形", triangles.len());
    Ok(())
}
