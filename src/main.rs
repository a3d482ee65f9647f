pub mod model;
pub mod parsing;
pub mod report;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use model::metrics::MetricsLogger;
use model::neural_net::{ActivationFunction, Hyperparams, InitMethod, NeuralNet};
use model::optimizer::{OptimizerConfig, OptimizerKind};
use model::{weights, Model};
use parsing::{load_split, Dataset, Split, NUM_CLASSES, NUM_FEATURES};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(version, about = "Train and inspect a fully-connected garment image classifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a network and report its accuracy on the validation set
    Train(TrainArgs),
    /// Score saved weights on a dataset
    Evaluate(EvaluateArgs),
    /// Print one image as text, with a prediction if weights are given
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// The path of the training dataset (CSV file or dataset directory)
    #[arg(short, long)]
    train_path: PathBuf,

    /// The path of the validation dataset (CSV file or dataset directory)
    #[arg(short, long)]
    validation_path: PathBuf,

    /// Network structure, e.g. "784 512 512 10"
    #[arg(short, long, value_parser, num_args = 2.., value_delimiter = ' ', default_values_t = [784, 128, 10])]
    network_structure: Vec<usize>,

    /// Learning rate of the network
    #[arg(short, long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Optimizer used for the parameter updates
    #[arg(long, value_enum, default_value_t = OptimizerKind::Sgd)]
    optimizer: OptimizerKind,

    /// SGD momentum
    #[arg(short, long, default_value_t = 0.0)]
    momentum: f64,

    /// L2 penalty on the weights
    #[arg(short, long, default_value_t = 0.0)]
    weight_decay: f64,

    /// Batch size of the network
    #[arg(short, long, default_value_t = 64)]
    batch_size: usize,

    /// Number of epochs to train the network for
    /// If this parameter is not provided, early stopping is used instead
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Tolerance for early stopping
    #[arg(short, long, default_value_t = 0.0001)]
    epsilon: f64,

    /// Most epochs early stopping may run for
    #[arg(long, default_value_t = 100)]
    max_epochs: usize,

    /// Activation function used by the hidden layers
    #[arg(short, long, value_enum, default_value_t = ActivationFunction::ReLU)]
    activation_function: ActivationFunction,

    /// Weight initialization method
    #[arg(short, long, value_enum, default_value_t = InitMethod::Kaiming)]
    initialization: InitMethod,

    /// Seed for initialization and shuffling
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Visit the training samples in file order instead of shuffling each epoch
    #[arg(long)]
    no_shuffle: bool,

    /// Only use the first N samples of each dataset
    #[arg(long)]
    limit: Option<usize>,

    /// Append per-epoch metrics to this CSV file
    #[arg(long)]
    metrics_path: Option<PathBuf>,

    /// Debug mode (save loss in a "epoch     loss" format)
    #[arg(short, long)]
    debug_path: Option<PathBuf>,

    /// Whether or not to export the model's weights
    /// Weights are exported in JSON format
    #[arg(short = 'W', long)]
    weight_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Weights written by `train`
    #[arg(short, long)]
    weight_path: PathBuf,

    /// CSV file or dataset directory (the test split is used for directories)
    #[arg(short, long)]
    data_path: PathBuf,

    #[arg(short, long, default_value_t = 256)]
    batch_size: usize,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// CSV file or dataset directory (the test split is used for directories)
    #[arg(short, long)]
    data_path: PathBuf,

    /// Which sample to show
    #[arg(short, long, default_value_t = 0)]
    index: usize,

    /// Weights written by `train`
    #[arg(short, long)]
    weight_path: Option<PathBuf>,
}

impl TrainArgs {
    fn hyperparams(&self) -> Hyperparams {
        Hyperparams {
            num_epochs: self.num_epochs,
            max_epochs: self.max_epochs,
            epsilon: self.epsilon,
            batch_size: self.batch_size,
            shuffle: !self.no_shuffle,
            seed: self.seed,
            optimizer: OptimizerConfig {
                kind: self.optimizer,
                learning_rate: self.learning_rate,
                momentum: self.momentum,
                weight_decay: self.weight_decay,
            },
        }
    }
}

fn load(path: &Path, split: Split, limit: Option<usize>) -> Result<Dataset> {
    let dataset = load_split(path, split)
        .with_context(|| format!("failed to load dataset from {}", path.display()))?;

    Ok(match limit {
        Some(n) => dataset.subset(n),
        None => dataset,
    })
}

fn train(args: TrainArgs) -> Result<()> {
    let structure = &args.network_structure;
    if structure.first() != Some(&NUM_FEATURES) || structure.last() != Some(&NUM_CLASSES) {
        bail!(
            "network structure {:?} must start with {} inputs and end with {} classes",
            structure,
            NUM_FEATURES,
            NUM_CLASSES
        );
    }

    let hyper = args.hyperparams();
    tracing::info!("hyperparams: {:?}", hyper);

    let train_set = load(&args.train_path, Split::Train, args.limit)?;
    let validation_set = load(&args.validation_path, Split::Test, args.limit)?;
    tracing::info!(
        "loaded {} training and {} validation samples",
        train_set.len(),
        validation_set.len()
    );

    let mut neural_net = NeuralNet::new(
        structure,
        args.activation_function,
        args.initialization,
        hyper,
    )?;
    tracing::info!(
        "network {:?} with {} parameters",
        neural_net.structure(),
        neural_net.num_parameters()
    );

    let mut logger = args
        .metrics_path
        .as_deref()
        .map(MetricsLogger::create)
        .transpose()
        .context("failed to open metrics file")?;
    let history = neural_net.fit_logged(&train_set, Some(&validation_set), logger.as_mut())?;
    if let Some(logger) = &logger {
        tracing::info!("metrics appended to {}", logger.path().display());
    }

    if let Some(debug_path) = &args.debug_path {
        report::write_losses(debug_path, &history)
            .with_context(|| format!("failed to write {}", debug_path.display()))?;
    }

    if let Some(weight_path) = &args.weight_path {
        weights::write_weights(weight_path, &neural_net)
            .with_context(|| format!("failed to write {}", weight_path.display()))?;
    }

    report::test_model(&validation_set, &neural_net)?;

    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    let neural_net = weights::read_weights(&args.weight_path)
        .with_context(|| format!("failed to read {}", args.weight_path.display()))?;
    if neural_net.num_outputs() != NUM_CLASSES {
        return Err(model::ModelError::ClassMismatch {
            expected: NUM_CLASSES,
            found: neural_net.num_outputs(),
        })
        .with_context(|| format!("{} is not a garment classifier", args.weight_path.display()));
    }
    let dataset = load(&args.data_path, Split::Test, None)?;

    let evaluation = neural_net.evaluate(&dataset, args.batch_size)?;
    println!(
        "Test error: accuracy {:.1}%, average loss {:.6}",
        evaluation.accuracy, evaluation.loss
    );

    report::test_model(&dataset, &neural_net)?;

    Ok(())
}

fn show(args: ShowArgs) -> Result<()> {
    let dataset = load(&args.data_path, Split::Test, None)?;
    let image = dataset.image(args.index).with_context(|| {
        format!(
            "index {} is out of range for {} samples",
            args.index,
            dataset.len()
        )
    })?;
    let label = dataset.labels()[args.index];

    print!("{}", report::render_image(&image));
    println!("label: {}", report::label_text(label));

    if let Some(weight_path) = &args.weight_path {
        let neural_net = weights::read_weights(weight_path)
            .with_context(|| format!("failed to read {}", weight_path.display()))?;
        let row = dataset.data.row(args.index).insert_axis(ndarray::Axis(0));
        let probabilities = neural_net.predict(&row)?;
        let predicted = parsing::argmax(probabilities.row(0).iter());

        println!(
            "predicted: {} ({:.1}%)",
            report::label_text(predicted),
            100.0 * probabilities[[0, predicted]]
        );
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("garment_classifier=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train(args) => train(args),
        Command::Evaluate(args) => evaluate(args),
        Command::Show(args) => show(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn train_defaults() {
        let cli = Cli::try_parse_from(["garment_classifier", "train", "-t", "a.csv", "-v", "b.csv"])
            .unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };

        assert_eq!(args.network_structure, vec![784, 128, 10]);
        assert_eq!(args.batch_size, 64);
        assert_eq!(args.learning_rate, 1e-3);
        assert_eq!(args.activation_function, ActivationFunction::ReLU);
        assert!(args.hyperparams().shuffle);
    }

    #[test]
    fn structure_and_enums_parse() {
        let cli = Cli::try_parse_from([
            "garment_classifier",
            "train",
            "-t",
            "a.csv",
            "-v",
            "b.csv",
            "-n",
            "784 128 10",
            "-a",
            "leaky-relu",
            "--optimizer",
            "adam",
            "--no-shuffle",
        ])
        .unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        let hyper = args.hyperparams();

        assert_eq!(args.network_structure, vec![784, 128, 10]);
        assert_eq!(args.activation_function, ActivationFunction::LeakyReLU);
        assert_eq!(hyper.optimizer.kind, OptimizerKind::Adam);
        assert!(!hyper.shuffle);
    }

    #[test]
    fn train_rejects_non_garment_structure() {
        let cli = Cli::try_parse_from([
            "garment_classifier",
            "train",
            "-t",
            "a.csv",
            "-v",
            "b.csv",
            "-n",
            "10 5 3",
        ])
        .unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };

        assert!(train(args).is_err());
    }

    #[test]
    fn evaluate_rejects_non_garment_weights() {
        let dir = tempfile::tempdir().unwrap();
        let data_csv = dir.path().join("test.csv");
        let weights_json = dir.path().join("weights.json");
        parsing::mnist::tests::write_csv(&data_csv, &[(0, 10), (3, 200)]);
        let net = NeuralNet::new(
            &[NUM_FEATURES, 5],
            ActivationFunction::ReLU,
            InitMethod::Xavier,
            Hyperparams::default(),
        )
        .unwrap();
        weights::write_weights(&weights_json, &net).unwrap();

        let err = evaluate(EvaluateArgs {
            weight_path: weights_json,
            data_path: data_csv,
            batch_size: 8,
        })
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<model::ModelError>(),
            Some(model::ModelError::ClassMismatch { expected: 10, found: 5 })
        ));
    }

    #[test]
    fn train_then_evaluate_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let train_csv = dir.path().join("train.csv");
        let weights_json = dir.path().join("weights.json");
        let metrics_csv = dir.path().join("metrics.csv");
        let losses_txt = dir.path().join("losses.txt");
        parsing::mnist::tests::write_csv(
            &train_csv,
            &[(1, 250), (8, 5), (1, 240), (8, 10), (1, 230), (8, 0)],
        );

        let path = |p: &std::path::Path| p.display().to_string();
        let cli = Cli::try_parse_from([
            "garment_classifier".to_string(),
            "train".into(),
            "-t".into(),
            path(&train_csv),
            "-v".into(),
            path(&train_csv),
            "-n".into(),
            "784 8 10".into(),
            "--num-epochs".into(),
            "3".into(),
            "-b".into(),
            "2".into(),
            "--metrics-path".into(),
            path(&metrics_csv),
            "-d".into(),
            path(&losses_txt),
            "-W".into(),
            path(&weights_json),
        ])
        .unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        train(args).unwrap();

        assert_eq!(std::fs::read_to_string(&losses_txt).unwrap().lines().count(), 3);
        assert_eq!(std::fs::read_to_string(&metrics_csv).unwrap().lines().count(), 4);

        let restored = weights::read_weights(&weights_json).unwrap();
        assert_eq!(restored.structure(), vec![784, 8, 10]);

        evaluate(EvaluateArgs {
            weight_path: weights_json.clone(),
            data_path: train_csv.clone(),
            batch_size: 4,
        })
        .unwrap();
        show(ShowArgs {
            data_path: train_csv.clone(),
            index: 1,
            weight_path: Some(weights_json),
        })
        .unwrap();
        assert!(show(ShowArgs {
            data_path: train_csv,
            index: 99,
            weight_path: None,
        })
        .is_err());
    }
}
