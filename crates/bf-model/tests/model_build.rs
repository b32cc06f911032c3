//! End-to-end checks of table construction and likelihood derivatives on
//! multi-channel inputs read from JSON.

use approx::assert_relative_eq;
use bf_core::{Error, SecondOrderObjective};
use bf_model::{
    BinnedModel, BuildOptions, Datacard, KAPPA_EPSILON, Likelihood, LikelihoodForm, ModelInput,
    Observation, Parameterization, ShapeStore, VariationTable,
};

fn load(name: &str) -> (Datacard, ShapeStore) {
    let path = format!("{}/../../tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    let json = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {path}: {e}"));
    let input = ModelInput::from_json_str(&json).unwrap();
    (input.card, input.shapes)
}

#[test]
fn two_channel_layout() {
    let (card, shapes) = load("two_channel.json");
    let t = VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap();
    assert_eq!(t.channels().len(), 2);
    assert_eq!(t.channels()[1].offset, t.channels()[0].nbins);
    assert_eq!(t.nbins(), 5);
    assert_eq!(t.npoi(), 2);
    assert_eq!(t.pois(), &["ggH", "vbfH"]);

    // vbfH is absent from the first channel
    let vbf = t.processes().iter().position(|p| p == "vbfH").unwrap();
    for b in 0..t.channels()[0].nbins {
        assert_eq!(t.norm()[b * t.nproc() + vbf], 0.0);
        for s in 0..t.nsyst() {
            assert_eq!(t.logkup()[t.index(b, vbf, s)], 0.0);
        }
    }
}

#[test]
fn table_build_is_bit_reproducible() {
    let (card, shapes) = load("two_channel.json");
    let a = VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap();
    let b = VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap();
    assert_eq!(a, b);
    let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(a.logkup()), bits(b.logkup()));
    assert_eq!(bits(a.logkavg()), bits(b.logkavg()));
}

#[test]
fn zero_up_variation_gives_sentinel_and_finite_hessian() {
    let (card, shapes) = load("two_channel.json");
    let t = VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap();
    let bkg = t.processes().iter().position(|p| p == "bkg").unwrap();
    let jes = t.systematics().iter().position(|s| s == "jes").unwrap();
    // ch2/bkg/jesUp has an empty first bin
    let b = t.channels()[1].offset;
    assert_relative_eq!(t.logkup()[t.index(b, bkg, jes)], KAPPA_EPSILON.ln(), epsilon = 1e-15);

    let m = BinnedModel::new(t);
    let obs = Observation::observed(&m);
    let p = Parameterization::new(&m, 1.0, false).unwrap();
    let l = Likelihood::new(&m, &obs, &p, LikelihoodForm::Offset).unwrap();
    let x = p.start_point(&vec![0.0; m.nsyst()]).unwrap();
    let e = l.evaluate(&x).unwrap();
    assert!(e.value.is_finite());
    assert!(e.hessian.iter().all(|h| h.is_finite()));
}

#[test]
fn unsupported_kind_aborts_construction() {
    let (mut card, shapes) = load("two_channel.json");
    card.systematics[0].kind = "gmN".to_string();
    let err = VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn hessian_is_positive_definite_at_asimov_start() {
    let (card, shapes) = load("two_channel.json");
    let m = BinnedModel::new(VariationTable::build(&card, &shapes, &BuildOptions::default()).unwrap());
    let p = Parameterization::new(&m, 1.0, false).unwrap();
    let obs = Observation::asimov(&m, p.logr_start(), &vec![0.0; m.nsyst()]).unwrap();
    let l = Likelihood::new(&m, &obs, &p, LikelihoodForm::Offset).unwrap();
    let x = p.start_point(&vec![0.0; m.nsyst()]).unwrap();
    let h = l.hessian(&x).unwrap();
    let n = l.dim();
    for i in 0..n {
        assert!(h[i * n + i] > 0.0);
    }
}
