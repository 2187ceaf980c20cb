/// Reference iteration count for the stability score.
pub const STABILITY_ITERATIONS: u32 = 600_000;
pub const STABILITY_THRESHOLD: f64 = 50.0;

/// Stability score of one record, in double precision.
///
/// The seed depends on the last decimal digit of the id (always taken as
/// non-negative), so records with equal load and uptime still diverge.
pub fn stability(id: i32, load: f32, uptime: i32, iterations: u32) -> f64 {
    let load = f64::from(load);
    let uptime = f64::from(uptime);
    let mut stability = 0.5 + f64::from(id.rem_euclid(10)) * 0.01;

    for i in 0..iterations {
        let i = f64::from(i);
        let f1 = (load * 0.001 * i).cos();
        let f2 = (uptime / 10_000.0 * i).sin();
        let f3 = if stability.abs() < 100.0 {
            (stability * 0.01).tan()
        } else {
            0.0
        };
        stability = (stability + f1 * f2 - f3 * 0.001).sin().abs();
    }

    stability * 100.0
}
