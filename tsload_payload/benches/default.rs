use criterion::criterion_main;


criterion_main!(encoder::benches);
