//! End-to-end tests of the stimulus-file writers: the files on disk are
//! the contract with the acquisition engine, so these tests parse the
//! written bytes back rather than inspecting in-memory state.

use std::fs;
use std::path::PathBuf;

use dynclamp_backend::*;

fn temp(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dynclamp_stim_{}_{}", std::process::id(), name))
}

fn read_rows(path: &PathBuf) -> Vec<Vec<f64>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            line.split('\t')
                .map(|field| field.parse::<f64>().unwrap())
                .collect()
        })
        .collect()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn pulse_train_rows_and_duration() {
    let path = temp("pulse_train");
    let total = write_pulse_train(&path, 10., 1., 500., 3, 0.5, false).unwrap();
    assert!(close(total, 1.201), "total duration {}", total);

    // delay, pulse, gap, pulse, gap, pulse, delay
    let rows = read_rows(&path);
    assert_eq!(rows.len(), 7);
    let expected = [
        (0.5, 0.),
        (0.001, 500.),
        (0.099, 0.),
        (0.001, 500.),
        (0.099, 0.),
        (0.001, 500.),
        (0.5, 0.),
    ];
    for (row, (duration, amplitude)) in rows.iter().zip(expected.iter()) {
        assert_eq!(row.len(), 12, "row has 12 fields");
        assert!(close(row[0], *duration), "duration {} vs {}", row[0], duration);
        assert_eq!(row[1], 1., "every pulse-train row is DC");
        assert!(close(row[2], *amplitude));
    }
    assert!(close(rows.iter().map(|r| r[0]).sum::<f64>(), total));
    fs::remove_file(&path).unwrap();
}

#[test]
fn pulse_train_recovery_pulse() {
    let path = temp("pulse_train_recovery");
    let total = write_pulse_train(&path, 10., 1., 500., 3, 0.5, true).unwrap();
    assert!(close(total, 1.702));

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 9);
    // The recovery pulse sits after a fixed 0.5 s gap.
    assert!(close(rows[6][0], 0.5));
    assert!(close(rows[6][2], 0.));
    assert!(close(rows[7][0], 0.001));
    assert!(close(rows[7][2], 500.));
    fs::remove_file(&path).unwrap();
}

#[test]
fn pulse_width_must_fit_the_period() {
    let err = write_pulse_train(temp("bad_pulse"), 100., 20., 500., 3, 0.5, false).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn preamble_prepends_fixed_diagnostics() {
    let path = temp("preamble");
    let mut stim = Stimulus::new();
    stim.push(StimRow::new(1., Waveform::Dc { amplitude: 80. }));
    let total = write_stim(&path, &stim, true).unwrap();
    assert!(close(total, 1. + PREAMBLE_DURATION));

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 6);
    let head = [
        (0.5, 0.),
        (0.01, -300.),
        (0.5, 0.),
        (0.6, -100.),
        (1., 0.),
    ];
    for (row, (duration, amplitude)) in rows.iter().zip(head.iter()) {
        assert_eq!(row[1], 1.);
        assert!(close(row[0], *duration));
        assert!(close(row[2], *amplitude));
    }
    assert!(close(rows[5][0], 1.));
    assert!(close(rows[5][2], 80.));
    fs::remove_file(&path).unwrap();
}

#[test]
fn zero_duration_rows_leave_no_trace() {
    let with_padding = temp("padded");
    let without_padding = temp("unpadded");

    let mut a = Stimulus::new();
    a.push(StimRow::new(0., Waveform::Dc { amplitude: 0. }));
    a.push(StimRow::new(1., Waveform::Dc { amplitude: 80. }));
    a.push(StimRow::new(
        0.,
        Waveform::Sine {
            amplitude: 1.,
            freq: 5.,
            phase: 0.,
            offset: 0.,
        },
    ));
    let mut b = Stimulus::new();
    b.push(StimRow::new(1., Waveform::Dc { amplitude: 80. }));

    assert_eq!(a.duration(), b.duration());
    write_stim(&with_padding, &a, false).unwrap();
    write_stim(&without_padding, &b, false).unwrap();
    assert_eq!(
        fs::read(&with_padding).unwrap(),
        fs::read(&without_padding).unwrap()
    );
    fs::remove_file(&with_padding).unwrap();
    fs::remove_file(&without_padding).unwrap();
}

#[test]
fn fixed_seeds_write_identical_files() {
    let first = temp("fixed_seed_1");
    let second = temp("fixed_seed_2");

    let build = || {
        let mut stim = Stimulus::new();
        stim.push(
            StimRow::new(
                5.,
                Waveform::Ou {
                    mean: 100.,
                    stddev: 30.,
                    tau_ms: 20.,
                },
            )
            .with_seed(42),
        );
        stim.push_group(vec![
            (
                Op::Init,
                StimRow::new(
                    2.,
                    Waveform::Gaussian {
                        mean: 0.,
                        stddev: 10.,
                    },
                )
                .with_seed(7),
            ),
            (
                Op::Plus,
                StimRow::new(0., Waveform::Dc { amplitude: 50. }),
            ),
        ])
        .unwrap();
        stim
    };

    write_stim(&first, &build(), false).unwrap();
    write_stim(&second, &build(), false).unwrap();
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    fs::remove_file(&first).unwrap();
    fs::remove_file(&second).unwrap();
}

#[test]
fn entropy_seeds_serialize_as_zero() {
    let path = temp("entropy_seed");
    let mut stim = Stimulus::new();
    stim.push(StimRow::new(
        1.,
        Waveform::Ou {
            mean: 0.,
            stddev: 1.,
            tau_ms: 5.,
        },
    ));
    write_stim(&path, &stim, false).unwrap();
    let rows = read_rows(&path);
    assert_eq!(rows[0][7], 0., "fix_seed");
    assert_eq!(rows[0][8], 0., "seed");
    fs::remove_file(&path).unwrap();
}

#[test]
fn append_extends_an_existing_file() {
    let path = temp("appended");
    let mut first = Stimulus::new();
    first.push(StimRow::new(1., Waveform::Dc { amplitude: 10. }));
    let mut second = Stimulus::new();
    second.push(StimRow::new(2., Waveform::Ramp { max: 200. }));

    write_stim(&path, &first, false).unwrap();
    let appended = append_stim(&path, &second).unwrap();
    assert!(close(appended, 2.));

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], 1.);
    assert_eq!(rows[1][1], 7.);
    assert!(close(rows[1][0], 2.));
    fs::remove_file(&path).unwrap();
}

#[test]
fn modulated_ou_emits_five_rows() {
    let path = temp("modulated_ou");
    // 20/Rin nS excitatory peak with Rin = 100 MOhm: g = 0.2 nS.
    let total = write_sinusoidally_modulated_ou(
        &path,
        2.,
        5000.,
        2500.,
        100.,
        5.,
        10.,
        OuKind::Excitatory,
        OuConductance::ResistanceScaled,
        12345,
    )
    .unwrap();
    assert!(close(total, PREAMBLE_DURATION + 10. + 1.));

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 5);

    // Leading and trailing zero rows.
    assert_eq!(rows[0][1], 1.);
    assert!(close(rows[0][0], PREAMBLE_DURATION));
    assert!(close(rows[0][2], 0.));
    assert_eq!(rows[4][1], 1.);
    assert!(close(rows[4][0], 1.));

    // The composite group: OU carrier, multiplicative std modulation,
    // additive mean modulation.
    let g = 0.2;
    let tau_s: f64 = 5e-3;
    let g_mean = g * tau_s * 5000.;
    let g_std = g * (tau_s * 5000. / 2.).sqrt();
    for row in &rows[1..4] {
        assert_eq!(row[1], -3., "group of three");
    }
    let carrier = &rows[1];
    assert!(close(carrier[0], 10.));
    assert_eq!(carrier[9], 2., "OU carried in extra_code");
    assert_eq!(carrier[10], 0., "head opens the group");
    assert!(close(carrier[2], 0.));
    assert!(close(carrier[3], g_std));
    assert!(close(carrier[4], 5.));
    assert_eq!(carrier[7], 1., "fixed seed");
    assert_eq!(carrier[8], 12345.);

    let std_mod = &rows[2];
    assert!(close(std_mod[0], 0.));
    assert_eq!(std_mod[9], 3.);
    assert_eq!(std_mod[10], 3., "multiplicative");
    assert!(close(std_mod[2], 2500. / (2. * 5000.)));
    assert!(close(std_mod[3], 2.));
    assert!(close(std_mod[5], 1.), "modulates around unity");

    let mean_mod = &rows[3];
    assert!(close(mean_mod[0], 0.));
    assert_eq!(mean_mod[9], 3.);
    assert_eq!(mean_mod[10], 1., "additive");
    assert!(close(mean_mod[2], g * tau_s * 2500.));
    assert!(close(mean_mod[5], g_mean), "offset carries the mean");
    fs::remove_file(&path).unwrap();
}

#[test]
fn modulated_ou_rejects_degenerate_rates() {
    let err = write_sinusoidally_modulated_ou(
        temp("bad_ou"),
        2.,
        0.,
        100.,
        100.,
        5.,
        10.,
        OuKind::Inhibitory,
        OuConductance::SingleChannel,
        1,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn cli_fragments_compile_to_expected_rows() {
    let path = temp("cli");
    let args: Vec<&str> = "dc -d 1 100 + sine --p1 50 --p2 10 ="
        .split_whitespace()
        .collect();
    let total = compile_cli(&args, &path, false).unwrap();
    assert!(close(total, 1.));

    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "1\t-2\t100\t0\t0\t0\t0\t0\t0\t1\t0\t1");
    assert_eq!(lines[1], "0\t-2\t50\t10\t0\t0\t0\t0\t0\t3\t1\t1");
    fs::remove_file(&path).unwrap();
}

#[test]
fn cli_appends_after_a_single_row() {
    let path = temp("cli_append");
    compile_cli(&["dc", "-d", "0.5", "250"], &path, false).unwrap();
    compile_cli(&["ramp", "-d", "1", "300"], &path, true).unwrap();
    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], 1.);
    assert_eq!(rows[1][1], 7.);
    fs::remove_file(&path).unwrap();
}

#[test]
fn cli_fixed_seed_is_recorded() {
    let path = temp("cli_seed");
    compile_cli(
        &["ou", "-d", "2", "-s", "99", "0", "30", "20"],
        &path,
        false,
    )
    .unwrap();
    let rows = read_rows(&path);
    assert_eq!(rows[0][1], 2.);
    assert_eq!(rows[0][7], 1.);
    assert_eq!(rows[0][8], 99.);
    fs::remove_file(&path).unwrap();
}
