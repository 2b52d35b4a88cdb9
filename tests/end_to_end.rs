use std::f64::consts::PI;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{Array1, Array2, Array3, Axis, Ix2};
use num_complex::Complex64;

use odnplab::analysis::{hydration, HydrationParameters, SmaxModel, T1InterpMethod};
use odnplab::data::{AttrValue, NDData};
use odnplab::io::{load, save, save_data, Workspace, WorkspaceItem};
use odnplab::pipeline::{
    apodize, autophase, cpmg_integrate, cpmg_show_integration_region, fourier_transform, integrate,
    inverse_fourier_transform, left_shift, ndalign, remove_background, remove_offset, AlignOptions,
    AutophaseOptions, FourierOptions, InverseFourierOptions, PhaseMethod, Regions, WindowOptions,
};
use odnplab::pipeline::phase::estimate_phase;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fid() -> NDData {
    let x = Array1::linspace(0.0, 1.0, 1024);
    let y = x.mapv(|t| Complex64::from_polar(1.0, 50.0 * PI * t) * (-t / 0.1).exp());
    let mut data = NDData::from_complex_1d("t2", x, y).unwrap();
    data.attrs.insert("nmr_frequency".into(), AttrValue::Float(400e6));
    data
}

#[test]
fn fid_to_spectrum() {
    init();
    let data = remove_background(&fid(), "t2", 0, None).unwrap();
    let data = left_shift(&data, "t2", 1).unwrap();
    let window = WindowOptions {
        linewidth: 1.0,
        ..Default::default()
    };
    let data = apodize(&data, "t2", &window).unwrap();
    let options = FourierOptions {
        zero_fill_factor: 1,
        shift: true,
        convert_to_ppm: true,
    };
    let spectrum = fourier_transform(&data, "t2", &options).unwrap();

    assert_eq!(spectrum.dims(), vec!["f2"]);
    assert_eq!(spectrum.len_of("f2").unwrap(), 1023);

    let magnitude = spectrum.abs();
    let (peak, peak_value) = magnitude
        .iter()
        .enumerate()
        .fold((0, 0.0), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
    let peak_hz = spectrum.coord("f2").unwrap()[peak] * 400.0;
    assert!((peak_hz - 25.0).abs() <= 1.0, "peak at {} Hz", peak_hz);

    let mut sorted: Vec<f64> = magnitude.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let noise_floor = sorted[sorted.len() / 2];
    assert!(peak_value >= 10.0 * noise_floor);

    assert_eq!(
        spectrum.proc_attrs.step_names(),
        vec!["remove_background", "left_shift", "window", "fourier_transform"]
    );
}

#[test]
fn fourier_round_trip_restores_values() {
    init();
    let data = fid();
    for shift in [false, true] {
        for ppm in [false, true] {
            let forward = FourierOptions {
                zero_fill_factor: 1,
                shift,
                convert_to_ppm: ppm,
            };
            let inverse = InverseFourierOptions {
                zero_fill_factor: 1,
                shift,
                convert_from_ppm: ppm,
            };
            let spectrum = fourier_transform(&data, "t2", &forward).unwrap();
            let back = inverse_fourier_transform(&spectrum, "f2", &inverse).unwrap();
            assert_eq!(back.dims(), vec!["t2"]);
            for (a, b) in back.values().iter().zip(data.values().iter()) {
                assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
                assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn integration_scenario() {
    init();
    let x = Array1::linspace(0.0, 2.0, 500);
    let y = x.mapv(|v| 2.0 * v + 1.0);
    let data = NDData::from_real_1d("x0", x, y).unwrap();

    let full = integrate(&data, "x0", &Regions::Full).unwrap();
    assert_abs_diff_eq!(full.item().unwrap().re, 6.0, epsilon = 1e-3);

    let one = integrate(&data, "x0", &Regions::One(0.0, 1.0)).unwrap();
    assert_abs_diff_eq!(one.item().unwrap().re, 2.0, epsilon = 7e-3);

    let many = integrate(&data, "x0", &Regions::Many(vec![(0.0, 0.5), (1.0, 2.0)])).unwrap();
    assert_eq!(many.dims(), vec!["integrals"]);
    assert_relative_eq!(many.values()[[0]].re, 0.75, max_relative = 0.01);
    assert_relative_eq!(many.values()[[1]].re, 4.0, max_relative = 0.01);
}

#[test]
fn fold_unfold_is_exact_for_every_dim() {
    let values = Array3::from_shape_fn((3, 4, 5), |(i, j, k)| Complex64::new((i * 20 + j * 5 + k) as f64, k as f64));
    let data = NDData::new(
        values.into_dyn(),
        &["t2", "power", "t1"],
        vec![
            Array1::linspace(0.0, 1.0, 3),
            Array1::linspace(-30.0, 0.0, 4),
            Array1::linspace(0.1, 2.0, 5),
        ],
    )
    .unwrap();
    for dim in ["t2", "power", "t1"] {
        let unfolded = data.unfold(dim).unwrap();
        assert_eq!(unfolded.ndim(), 2);
        assert_eq!(unfolded.dims()[0], dim);
        assert_eq!(unfolded.fold().unwrap(), data);
    }
}

#[test]
fn remove_offset_twice_equals_once() {
    let x = Array1::linspace(0.0, 1.0, 64);
    let y = x.mapv(|t: f64| (-t / 0.2).exp() + 0.3);
    let data = NDData::from_real_1d("t2", x, y).unwrap();
    let once = remove_offset(&data, "t2", Some(10)).unwrap();
    let twice = remove_offset(&once, "t2", Some(10)).unwrap();
    for (a, b) in once.values().iter().zip(twice.values().iter()) {
        assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
    }
}

#[test]
fn scalar_arithmetic_laws() {
    let data = NDData::from_real_1d("x", Array1::linspace(0.0, 1.0, 5), Array1::linspace(1.0, 3.0, 5)).unwrap();
    let a = (&data + 1.0) + 1.0;
    let b = &data + 2.0;
    assert_eq!(a.values(), b.values());
    let zero = &data * 0.0;
    assert!(zero.values().iter().all(|v| *v == Complex64::new(0.0, 0.0)));
    assert_eq!(zero.coords(), data.coords());
}

#[test]
fn align_is_idempotent() {
    let centres = [30.0, 34.0, 27.0, 31.0];
    let values = Array2::from_shape_fn((80, 4), |(i, j)| {
        let d = i as f64 - centres[j];
        Complex64::new(1.0 / (1.0 + d * d / 4.0), 0.0)
    });
    let data = NDData::new(
        values.into_dyn(),
        &["f2", "power"],
        vec![Array1::linspace(-4.0, 3.9, 80), Array1::linspace(0.0, 3.0, 4)],
    )
    .unwrap();
    let once = ndalign(&data, "f2", &AlignOptions::default()).unwrap();
    let twice = ndalign(&once, "f2", &AlignOptions::default()).unwrap();
    assert_eq!(once.values(), twice.values());
}

#[test]
fn cpmg_scenario() {
    init();
    let (n_echo, period, first, dt) = (8usize, 4e-4, 2e-4, 1e-5);
    let n = ((first + n_echo as f64 * period) / dt) as usize;
    let t = Array1::from_shape_fn(n, |i| i as f64 * dt);
    let y = t.mapv(|v| {
        (0..n_echo)
            .map(|k| {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                sign * (-((v - first - k as f64 * period) / 2e-5).powi(2)).exp()
            })
            .sum::<f64>()
    });
    let data = NDData::from_real_1d("t2", t, y).unwrap();

    let windows = cpmg_show_integration_region(&data, "t2", n_echo, first, period, 1e-4, None, true).unwrap();
    assert_eq!(windows.regions.len(), n_echo);
    for (k, &(lo, hi)) in windows.regions.iter().enumerate() {
        assert_abs_diff_eq!((lo + hi) / 2.0, first + k as f64 * period, epsilon = 1e-12);
    }

    let raw = cpmg_integrate(&data, "t2", &windows.regions, false).unwrap();
    let signs: Vec<f64> = raw.real().iter().map(|v| v.signum()).collect();
    let expected: Vec<f64> = (0..n_echo).map(|k| if k % 2 == 0 { 1.0 } else { -1.0 }).collect();
    assert_eq!(signs, expected);
}

#[test]
fn autophase_search_recovers_phase() {
    init();
    let x = Array1::linspace(-5.0, 5.0, 201);
    let real = x.mapv(|v| 1.0 / (1.0 + v * v));
    for phi in [-1.4, -0.7, 0.0, 0.3, 1.2] {
        let rotated = real.mapv(|v| Complex64::from_polar(v, phi));
        let data = NDData::from_complex_1d("f2", x.clone(), rotated).unwrap();
        let options = AutophaseOptions {
            method: PhaseMethod::Search,
            search_points: 180,
            ..Default::default()
        };
        let estimate = estimate_phase(&data, "f2", &options).unwrap();
        assert!((estimate - phi).abs() <= PI / 180.0, "phi {} estimate {}", phi, estimate);

        let corrected = autophase(&data, "f2", &options).unwrap();
        let im: f64 = corrected.imag().iter().map(|v| v.abs()).sum();
        let re: f64 = corrected.real().iter().map(|v| v.abs()).sum();
        assert!(im / re < 0.01);
    }
}

#[test]
fn hydration_from_processed_datasets() {
    init();
    let (spin_c, t10, t100, ksigma, p_half) = (125e-6, 1.5, 2.0, 20.18, 0.3);
    let ratio = odnplab::analysis::hydration::omega_ratio();
    let t1_of = |p: f64| {
        let y = t100 + 0.05 * p;
        y / (1.0 + y / t10 - y / t100)
    };
    let e_power = Array1::linspace(0.0, 2.0, 21);
    let e = e_power.mapv(|p| 1.0 - ksigma * p / (p_half + p) * spin_c * ratio * t1_of(p));
    let t1_power = Array1::linspace(0.0, 2.0, 6);
    let t1 = t1_power.mapv(t1_of);

    let enhancements = NDData::from_real_1d("power", e_power, e).unwrap();
    let t1 = NDData::from_real_1d("power", t1_power, t1).unwrap();
    let mut params = HydrationParameters::new(348.5, spin_c, t10, t100);
    params.smax_model = SmaxModel::Tethered;
    params.t1_interp_method = T1InterpMethod::Linear;

    let res = hydration(&enhancements, &t1, &params).unwrap();
    assert_relative_eq!(res.ksigma, 20.18, max_relative = 1e-4);
    assert_relative_eq!(res.krho, 1333.33, max_relative = 1e-5);
    assert_relative_eq!(res.klow, 2175.14, max_relative = 1e-4);
    assert_relative_eq!(res.coupling_factor, 0.0151, max_relative = 0.01);
    assert_relative_eq!(res.tcorr, 667.6, max_relative = 1e-3);
    assert_relative_eq!(res.dlocal, 2.19e-10, max_relative = 5e-3);

    params.smax_model = SmaxModel::Free;
    let free = hydration(&enhancements, &t1, &params).unwrap();
    assert_relative_eq!(free.ksigma, 57.74, max_relative = 1e-3);
}

#[test]
fn hydration_with_second_order_t1() {
    init();
    let (spin_c, t10, t100, ksigma, p_half, delta) = (125e-6, 1.5, 2.0, 20.18, 0.3, 0.1);
    let ratio = odnplab::analysis::hydration::omega_ratio();
    let khh = (1.0 / t10 - 1.0 / t100) / spin_c;
    // Paramagnetic relaxivity quadratic in power, water T1 linear in power
    let t1_of = |p: f64| {
        let krp = 40.0 - 5.0 * p + 1.5 * p * p;
        1.0 / (spin_c * krp + 1.0 / (t100 + delta * p) + khh * spin_c)
    };
    let e_power = Array1::linspace(0.0, 2.0, 21);
    let e = e_power.mapv(|p| 1.0 - ksigma * p / (p_half + p) * spin_c * ratio * t1_of(p));
    let t1_power = Array1::linspace(0.0, 2.0, 6);
    let t1 = t1_power.mapv(t1_of);

    let enhancements = NDData::from_real_1d("power", e_power.clone(), e).unwrap();
    let t1 = NDData::from_real_1d("power", t1_power, t1).unwrap();
    let mut params = HydrationParameters::new(348.5, spin_c, t10, t100);
    params.smax_model = SmaxModel::Tethered;
    params.t1_interp_method = T1InterpMethod::SecondOrder;
    params.delta_t1_water = Some(delta);

    let res = hydration(&enhancements, &t1, &params).unwrap();
    for (t, &p) in res.interpolated_t1.iter().zip(e_power.iter()) {
        assert_relative_eq!(*t, t1_of(p), max_relative = 1e-8);
    }
    assert_relative_eq!(res.ksigma, 20.18, max_relative = 1e-4);
    assert_relative_eq!(res.krho, 1333.33, max_relative = 1e-5);
    assert_relative_eq!(res.klow, 2175.14, max_relative = 1e-4);
    assert_relative_eq!(res.coupling_factor, 0.0151, max_relative = 0.01);
    assert_relative_eq!(res.tcorr, 667.6, max_relative = 1e-3);
    assert_relative_eq!(res.dlocal, 2.19e-10, max_relative = 5e-3);
}

#[test]
fn workspace_round_trip() {
    init();
    let values = Array2::from_shape_fn((6, 3), |(i, j)| Complex64::new(i as f64 / 3.0, (j as f64).sqrt()));
    let mut data = NDData::new(
        values.into_dyn(),
        &["f2", "power"],
        vec![Array1::linspace(-1.0, 1.0, 6), Array1::linspace(0.0, 0.02, 3)],
    )
    .unwrap();
    data.attrs.insert("nmr_frequency".into(), AttrValue::Float(14.8e6));
    data.attrs.insert("comment".into(), AttrValue::None);
    let data = remove_offset(&data, "f2", Some(2)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let single = dir.path().join("single.json");
    save_data(&single, &data).unwrap();
    let back = load(&single).unwrap().into_data().unwrap();
    assert_eq!(back, data);
    let v = back.values().view().into_dimensionality::<Ix2>().unwrap();
    assert_eq!(v.len_of(Axis(1)), 3);

    let mut ws = Workspace::new();
    ws.insert("spectra".into(), WorkspaceItem::Data(data.clone()));
    ws.insert("notes".into(), WorkspaceItem::Dict(data.attrs.clone()));
    let multi = dir.path().join("multi.json");
    save(&multi, &ws).unwrap();
    assert_eq!(load(&multi).unwrap().into_workspace(), ws);
}
