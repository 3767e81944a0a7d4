use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tally::{
    RequestChannel,
    config::ServiceConfig,
    protocol::Label,
    server::{CounterService, CounterTable},
};
use tokio::{net::TcpListener, runtime::Builder};

fn table_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_table");
    group.throughput(Throughput::Elements(1));

    let table = CounterTable::default();
    let label = Label::new("job").expect("valid label");
    group.bench_function("next_reply/one_label", |b| {
        b.iter(|| black_box(table.next_reply(black_box(&label))));
    });

    let table = CounterTable::default();
    let labels = (0..1024)
        .map(|i| Label::new(format!("label-{i}")).expect("valid label"))
        .collect::<Vec<_>>();
    let mut i = 0;
    group.bench_function("next_reply/1024_labels", |b| {
        b.iter(|| {
            i = (i + 1) % labels.len();
            black_box(table.next_reply(&labels[i]))
        });
    });

    group.finish();
}

fn round_trip_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let (addr, service) = rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr").to_string();
        let service = CounterService::new(ServiceConfig::default()).expect("valid config");
        let serving = service.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (addr, service)
    });

    let label = Label::new("bench").expect("valid label");
    let mut group = c.benchmark_group("loopback");
    group.throughput(Throughput::Elements(1));
    group.bench_function("round_trip", |b| {
        b.to_async(&rt).iter(|| {
            let channel = RequestChannel::new(addr.clone(), label.clone());
            async move { black_box(channel.await.expect("round trip failed")) }
        });
    });
    group.finish();

    service.shutdown();
}

criterion_group!(benches, table_bench, round_trip_bench);
criterion_main!(benches);
