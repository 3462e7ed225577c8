mod debug_report;

use cube_decoder::{Decoder, DistortionPenalty, FeatureRegistry, NgramModel, Options, PhraseTable, WordPenalty};
use std::io::{self, BufRead, IsTerminal};
use std::time::Duration;

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let decoder = match build_decoder(&config) {
        Ok(decoder) => decoder,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let inputs = match &config.input {
        Some(text) => vec![text.clone()],
        None => match read_stdin_lines() {
            Ok(lines) => lines,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(2);
            }
        },
    };

    if run(&decoder, &config, &inputs) {
        std::process::exit(1);
    }
}

/// Decode every input and print the results. Returns true if any sentence failed.
fn run(decoder: &Decoder, config: &CliConfig, inputs: &[String]) -> bool {
    let mut failed = false;
    if config.verbose {
        for input in inputs {
            match decoder.decode_verbose(input) {
                Ok((translation, details)) => debug_report::print_run(input, &translation, &details, config.color),
                Err(err) => {
                    eprintln!("error: {err}");
                    failed = true;
                }
            }
        }
    } else if let Some(n) = config.nbest {
        for (idx, input) in inputs.iter().enumerate() {
            match decoder.n_best(input, n) {
                Ok(list) => debug_report::print_nbest(idx, &list),
                Err(err) => {
                    eprintln!("error: {err}");
                    failed = true;
                }
            }
        }
    } else {
        for result in decoder.decode_batch(inputs) {
            match result {
                Ok(translation) => println!("{}", translation.text),
                Err(err) => {
                    eprintln!("error: {err}");
                    println!();
                    failed = true;
                }
            }
        }
    }
    failed
}

struct CliConfig {
    input: Option<String>,
    table: String,
    lm: Option<String>,
    tm_weights: Option<Vec<f64>>,
    lm_weight: f64,
    distortion_weight: f64,
    word_penalty_weight: f64,
    options: Options,
    nbest: Option<usize>,
    verbose: bool,
    color: bool,
}

fn build_decoder(config: &CliConfig) -> Result<Decoder, String> {
    let table = PhraseTable::load(&config.table).map_err(|err| format!("error: {}: {err}", config.table))?;
    let tm_weights = match &config.tm_weights {
        Some(weights) => weights.clone(),
        None => vec![1.0; table.num_scores()],
    };

    let mut registry = FeatureRegistry::new(tm_weights)
        .with_feature(Box::new(DistortionPenalty), vec![config.distortion_weight])
        .and_then(|r| r.with_feature(Box::new(WordPenalty), vec![config.word_penalty_weight]))
        .map_err(|err| format!("error: {err}"))?;
    if let Some(path) = &config.lm {
        let lm = NgramModel::load_arpa(path).map_err(|err| format!("error: {path}: {err}"))?;
        registry = registry.with_feature(Box::new(lm), vec![config.lm_weight]).map_err(|err| format!("error: {err}"))?;
    }

    Decoder::new(table, registry, config.options.clone()).map_err(|err| format!("error: {err}"))
}

fn parse_args() -> Result<CliConfig, String> {
    let mut config = CliConfig {
        input: None,
        table: String::new(),
        lm: None,
        tm_weights: None,
        lm_weight: 0.5,
        distortion_weight: 0.3,
        word_penalty_weight: -1.0,
        options: Options::default(),
        nbest: None,
        verbose: false,
        color: io::stdout().is_terminal(),
    };
    let mut table: Option<String> = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        // `--flag=value` and `--flag value` are equivalent.
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, String> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => args.next().ok_or_else(|| format!("error: {name} expects a value")),
            }
        };

        match flag.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("cube-decoder {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => config.color = true,
            "--no-color" => config.color = false,
            "-v" | "--verbose" => config.verbose = true,
            "--monotone-at-punctuation" => config.options.monotone_at_punctuation = true,
            "--require-full-coverage" => config.options.require_full_coverage = true,
            "-t" | "--table" => table = Some(value("--table")?),
            "--lm" => config.lm = Some(value("--lm")?),
            "--tm-weights" => config.tm_weights = Some(parse_weights(&value("--tm-weights")?)?),
            "--lm-weight" => config.lm_weight = parse_num("--lm-weight", &value("--lm-weight")?)?,
            "--distortion-weight" => {
                config.distortion_weight = parse_num("--distortion-weight", &value("--distortion-weight")?)?
            }
            "--word-penalty" => config.word_penalty_weight = parse_num("--word-penalty", &value("--word-penalty")?)?,
            "--stack-size" => config.options.stack_size = parse_num("--stack-size", &value("--stack-size")?)?,
            "--beam" => config.options.beam_threshold = parse_num("--beam", &value("--beam")?)?,
            "--pop-limit" => config.options.pop_limit = parse_num("--pop-limit", &value("--pop-limit")?)?,
            "--diversity" => config.options.diversity = parse_num("--diversity", &value("--diversity")?)?,
            "--diversity-budget" => {
                config.options.diversity_budget = Some(parse_num("--diversity-budget", &value("--diversity-budget")?)?)
            }
            "--distortion-limit" => {
                let raw = value("--distortion-limit")?;
                config.options.max_distortion = match raw.as_str() {
                    "none" | "-1" => None,
                    _ => Some(parse_num("--distortion-limit", &raw)?),
                };
            }
            "--max-phrase-length" => {
                config.options.max_phrase_length = parse_num("--max-phrase-length", &value("--max-phrase-length")?)?
            }
            "--table-limit" => config.options.table_limit = parse_num("--table-limit", &value("--table-limit")?)?,
            "--time-limit-ms" => {
                let ms: u64 = parse_num("--time-limit-ms", &value("--time-limit-ms")?)?;
                config.options.time_limit = Some(Duration::from_millis(ms));
            }
            "--nbest" => config.nbest = Some(parse_num("--nbest", &value("--nbest")?)?),
            "--" => {
                let rest = args.collect::<Vec<_>>().join(" ");
                if !rest.trim().is_empty() {
                    config.input = Some(rest);
                }
                break;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                config.input = Some(std::iter::once(arg).chain(args).collect::<Vec<_>>().join(" "));
                break;
            }
        }
    }

    config.table = table.ok_or_else(|| format!("error: --table is required\n\n{}", help_text()))?;
    if config.options.beam_threshold.is_nan() {
        return Err("error: --beam must be a number".to_string());
    }
    Ok(config)
}

fn parse_num<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T, String> {
    raw.trim().parse().map_err(|_| format!("error: invalid value '{raw}' for {flag}"))
}

fn parse_weights(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',').map(|w| parse_num("--tm-weights", w)).collect()
}

/// Non-empty stdin lines, one sentence each.
fn read_stdin_lines() -> Result<Vec<String>, String> {
    let mut lines = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.map_err(|err| format!("error: failed to read stdin: {err}"))?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return Err(format!("error: no input provided\n\n{}", help_text()));
    }
    Ok(lines)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    let defaults = Options::default();
    format!(
        "cube-decoder {version}

Phrase-based translation with cube-pruning search.

Usage:
  cube-decoder --table <file> [OPTIONS] [--] <sentence...>
  cube-decoder --table <file> [OPTIONS] < sentences.txt

Model:
  -t, --table <file>              Phrase table ('source ||| target ||| scores').
  --lm <file>                     ARPA n-gram language model.
  --tm-weights <w,w,...>          Phrase-table score weights. Default: all 1.0
  --lm-weight <w>                 Default: 0.5
  --distortion-weight <w>         Default: 0.3
  --word-penalty <w>              Default: -1.0

Search:
  --stack-size <n>                Hypotheses kept per stack. Default: {stack_size}
  --beam <ratio>                  Beam threshold in [0, 1]. Default: {beam}
  --pop-limit <n>                 Promotions per stack. Default: {pop_limit}
  --diversity <n>                 Minimum promotions per container. Default: {diversity}
  --diversity-budget <n>          Cap on forced promotions per stack.
  --distortion-limit <n|none>     Default: {distortion}
  --max-phrase-length <n>         Default: {max_phrase}
  --table-limit <n>               Options kept per span (0 = all). Default: {table_limit}
  --time-limit-ms <ms>            Per-sentence wall-clock budget.
  --monotone-at-punctuation       No reordering across punctuation.
  --require-full-coverage         Fail instead of printing partial translations.

Output:
  --nbest <n>                     Print up to n distinct translations per sentence.
  -v, --verbose                   Print the search report for each sentence.
  --color                         Force ANSI color output.
  --no-color                      Disable ANSI color output.
  -h, --help                      Show this help message.
  -V, --version                   Print version information.

Without a sentence argument, every non-empty stdin line is decoded.

Exit codes:
  0  Success.
  1  At least one sentence failed to decode.
  2  Invalid arguments, unreadable model files or missing input.
",
        version = env!("CARGO_PKG_VERSION"),
        stack_size = defaults.stack_size,
        beam = defaults.beam_threshold,
        pop_limit = defaults.pop_limit,
        diversity = defaults.diversity,
        distortion = defaults.max_distortion.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string()),
        max_phrase = defaults.max_phrase_length,
        table_limit = defaults.table_limit,
    )
}
