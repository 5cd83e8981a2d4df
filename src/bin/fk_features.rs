use clap::{App, Arg};
use fkfeatures::gen_seq::generate_set;
use fkfeatures::hmm::{HiddenMarkovModel, HmmProvider};
use fkfeatures::{FisherConfig, FisherFeatures, ScalarTerms};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::io::Write;
use std::sync::Arc;
#[macro_use]
extern crate log;

fn models() -> fkfeatures::Result<(HiddenMarkovModel, HiddenMarkovModel)> {
    let start = [0.5, 0.5];
    let end = [0.5, 0.5];
    // CpG-island-like and background-like nucleotide models.
    let pos = HiddenMarkovModel::new(
        2,
        4,
        &start,
        &end,
        &[0.95, 0.05, 0.05, 0.95],
        &[0.1, 0.4, 0.4, 0.1, 0.3, 0.2, 0.2, 0.3],
    )?;
    let neg = HiddenMarkovModel::new(
        2,
        4,
        &start,
        &end,
        &[0.5, 0.5, 0.5, 0.5],
        &[0.3, 0.2, 0.2, 0.3, 0.25, 0.25, 0.25, 0.25],
    )?;
    Ok((pos, neg))
}

fn parse_weight(arg: Option<&str>) -> std::io::Result<Option<f64>> {
    match arg {
        Some(arg) => arg.parse().map(Some).map_err(|why| {
            let msg = format!("--weight {}: {}", arg, why);
            std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
        }),
        None => Ok(None),
    }
}

fn main() -> std::io::Result<()> {
    let matches = App::new("fk_features")
        .version("0.1")
        .about("Sample sequences from two HMMs and write their Fisher-kernel features (TSV).")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Debug mode"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .default_value("32389")
                .help("Seed"),
        )
        .arg(
            Arg::with_name("num")
                .long("num")
                .takes_value(true)
                .default_value("20")
                .help("Number of sequences sampled from each model."),
        )
        .arg(
            Arg::with_name("length")
                .long("length")
                .takes_value(true)
                .default_value("100")
                .help("Length of each sequence."),
        )
        .arg(
            Arg::with_name("weight")
                .long("weight")
                .takes_value(true)
                .conflicts_with("optimize")
                .help("Mixing weight a in [0,1]."),
        )
        .arg(
            Arg::with_name("optimize")
                .long("optimize")
                .help("Estimate the mixing weight before computing features."),
        )
        .arg(
            Arg::with_name("sensitivity")
                .long("sensitivity")
                .help("Append d/da of the mixture log likelihood to each row."),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .short("t")
                .takes_value(true)
                .default_value("1")
                .help("Number of threads"),
        )
        .get_matches();
    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let threads: usize = matches
        .value_of("threads")
        .and_then(|x| x.parse().ok())
        .unwrap();
    if let Err(why) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        debug!("{:?}", why);
    }
    let seed: u64 = matches
        .value_of("seed")
        .and_then(|e| e.parse().ok())
        .unwrap();
    let num: usize = matches
        .value_of("num")
        .and_then(|e| e.parse().ok())
        .unwrap();
    let length: usize = matches
        .value_of("length")
        .and_then(|e| e.parse().ok())
        .unwrap();
    let to_io = |e: fkfeatures::FisherError| std::io::Error::new(std::io::ErrorKind::Other, e);
    let (pos, neg) = models().map_err(to_io)?;
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
    let mut seqs = generate_set(&pos, num, length, &mut rng);
    seqs.extend(generate_set(&neg, num, length, &mut rng));
    let seqs: Arc<[Vec<usize>]> = seqs.into();
    let pos = HmmProvider::new(pos, seqs.clone()).map_err(to_io)?;
    let neg = HmmProvider::new(neg, seqs).map_err(to_io)?;
    let mut config = FisherConfig::default();
    if matches.is_present("sensitivity") {
        config.scalar_terms = ScalarTerms::LogRatioAndSensitivity;
    }
    let features = FisherFeatures::new(Arc::new(pos), Arc::new(neg), config);
    if matches.is_present("optimize") {
        let outcome = features.optimize(None).map_err(to_io)?;
        if !outcome.converged {
            warn!("Weight search did not converge. a={}", outcome.a);
        }
    } else if let Some(a) = parse_weight(matches.value_of("weight"))? {
        features.set_a(a).map_err(to_io)?;
    }
    let matrix = features.materialize_full_matrix().map_err(to_io)?;
    info!("{} rows, {} features", matrix.num_rows(), matrix.num_features());
    let stdout = std::io::stdout();
    let mut wtr = std::io::BufWriter::new(stdout.lock());
    for (i, row) in matrix.rows().enumerate() {
        let label = if i < num { "pos" } else { "neg" };
        let row: Vec<_> = row.iter().map(|x| format!("{:.6}", x)).collect();
        writeln!(wtr, "{}\t{}", label, row.join("\t"))?;
    }
    Ok(())
}
