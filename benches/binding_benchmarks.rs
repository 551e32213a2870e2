/// 绑定层性能基准测试
///
/// 测试字段读写、数组同步、事件分发和控制器单步的开销

use std::hint::black_box;
use std::sync::Arc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scene_binding::binding::{FieldEvent, WrapperCache};
use scene_binding::config::ScriptConfig;
use scene_binding::core::ScriptResult;
use scene_binding::engine::{
    AccessKind, FieldDeclaration, FieldValue, MemoryNode, MemoryScene, ValueKind,
};
use scene_binding::{ExecutionContext, ScriptContext, ScriptImplementation, ScriptInvocationController};

fn sample_node() -> Arc<MemoryNode> {
    MemoryNode::shared(
        "Sample",
        vec![
            FieldDeclaration::new("scale", AccessKind::InputOutput, ValueKind::Scalar),
            FieldDeclaration::new("points", AccessKind::InputOutput, ValueKind::ScalarArray),
            FieldDeclaration::new("changed", AccessKind::OutputOnly, ValueKind::Scalar),
        ],
    )
}

// ============================================================================
// 字段读写
// ============================================================================

fn bench_field_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_access");

    let memory = sample_node();
    let cache = WrapperCache::default();
    let node = cache.node_wrapper(&memory.handle());
    node.set_access_permitted(true);
    let scale = node.get_field("scale").unwrap();

    group.bench_function("get_scalar", |bencher| {
        bencher.iter(|| black_box(scale.get_scalar().unwrap()));
    });

    group.bench_function("set_scalar", |bencher| {
        bencher.iter(|| scale.set_scalar(black_box(1.5)).unwrap());
    });

    group.bench_function("set_and_push", |bencher| {
        bencher.iter(|| {
            scale.set_scalar(black_box(2.5)).unwrap();
            scale.update_node().unwrap();
        });
    });

    group.bench_function("cached_lookup", |bencher| {
        bencher.iter(|| black_box(node.get_field("scale").unwrap()));
    });

    group.finish();
}

// ============================================================================
// 数组同步
// ============================================================================

fn bench_array_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_pull");

    for size in [16usize, 256, 4096].iter() {
        let memory = sample_node();
        memory
            .set_engine_value(1, FieldValue::ScalarArray(vec![0.5; *size]))
            .unwrap();
        let cache = WrapperCache::default();
        let points = cache.field_wrapper(&memory.handle(), "points", false).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bencher, _| {
            bencher.iter(|| {
                points.update_field().unwrap();
                black_box(())
            });
        });
    }

    group.finish();
}

// ============================================================================
// 事件分发
// ============================================================================

fn bench_event_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_dispatch");

    for listeners in [1usize, 8, 64].iter() {
        let memory = sample_node();
        let cache = WrapperCache::default();
        let changed = cache.field_wrapper(&memory.handle(), "changed", false).unwrap();
        for _ in 0..*listeners {
            changed
                .add_listener(Arc::new(|event: &FieldEvent| -> ScriptResult<()> {
                    black_box(event.timestamp());
                    Ok(())
                }))
                .unwrap();
        }

        group.bench_with_input(
            BenchmarkId::new("fire_notification", listeners),
            listeners,
            |bencher, _| {
                bencher.iter(|| black_box(changed.fire_notification(1.0)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("node_notification", listeners),
            listeners,
            |bencher, _| {
                bencher.iter(|| memory.notify_changed(2));
            },
        );
    }

    group.finish();
}

// ============================================================================
// 控制器单步
// ============================================================================

struct Echo;

impl ScriptImplementation for Echo {
    fn initialize(&mut self, context: &ScriptContext) -> ScriptResult<()> {
        let output = context.field("value_changed")?;
        context.field("set_value")?.add_listener(Arc::new(
            move |event: &FieldEvent| -> ScriptResult<()> {
                if let Some(source) = event.source() {
                    output.set_scalar(source.get_scalar()?)?;
                }
                Ok(())
            },
        ))?;
        Ok(())
    }
}

fn bench_controller_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("controller_step");

    let script = MemoryNode::shared(
        "Script",
        vec![
            FieldDeclaration::new("set_value", AccessKind::InputOnly, ValueKind::Scalar),
            FieldDeclaration::new("value_changed", AccessKind::OutputOnly, ValueKind::Scalar),
        ],
    );
    let scene = Arc::new(MemoryScene::new());
    let routes = Arc::new(scene.route_manager());
    let execution = ExecutionContext::new(scene, routes, WrapperCache::default());
    let mut controller =
        ScriptInvocationController::new(Box::new(Echo), execution, ScriptConfig::default());
    controller.initialize(&script.handle()).unwrap();

    group.bench_function("queue_send_update", |bencher| {
        let mut step = 0.0;
        bencher.iter(|| {
            step += 1.0;
            script.set_engine_value(0, FieldValue::Scalar(step)).unwrap();
            controller.set_timestamp(step);
            controller.queue_event("set_value").unwrap();
            controller.send_events().unwrap();
            controller.update_event_outs().unwrap();
            black_box(controller.events_processed().unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_field_access,
    bench_array_pull,
    bench_event_dispatch,
    bench_controller_step,
);
criterion_main!(benches);
