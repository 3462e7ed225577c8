use cube_decoder::{OptionOrigin, SearchDetails, StackSummary, Translation};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            self.paint(s, BOLD)
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            self.paint(s, DIM)
        }
    }
}

pub fn print_run(input: &str, translation: &Translation, details: &SearchDetails, color: bool) {
    let palette = ansi::Palette::new(color);
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Decoding: \"{}\"", input.trim()), ansi::CYAN)));

    println!("\n{}", palette.paint("━━━ Stacks ━━━", ansi::GRAY));
    print_stacks(&details.stacks, &palette);

    println!("\n{}", palette.paint("━━━ Translation ━━━", ansi::GRAY));
    print_translation(translation, &palette);

    println!("\n{}", palette.paint("━━━ Search ━━━", ansi::GRAY));
    println!(
        "  hypotheses: {}  │  coverage states: {}  │  options: {}",
        palette.paint(details.hypotheses.to_string(), ansi::BLUE),
        palette.paint(details.coverage_states.to_string(), ansi::BLUE),
        palette.paint(details.options.to_string(), ansi::BLUE),
    );
    if details.extra_merged > 0 || details.extra_discarded > 0 {
        println!(
            "  extra candidates: {} merged, {} discarded",
            palette.paint(details.extra_merged.to_string(), ansi::MAGENTA),
            palette.dim(details.extra_discarded.to_string()),
        );
    }
    if details.timed_out {
        println!("  {}", palette.paint("time limit reached; later stacks were not processed", ansi::YELLOW));
    }

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Total: {}  │  Options: {}",
        palette.paint(format!("{:?}", details.total), ansi::GREEN),
        palette.dim(format!("{:?}", details.collect)),
    );
    println!();
}

fn print_stacks(stacks: &[StackSummary], palette: &ansi::Palette) {
    for stack in stacks {
        let label = palette.paint(format!("Stack {:>2}:", stack.cardinality), ansi::BLUE);
        if stack.size == 0 {
            println!("  {} {}", label, palette.dim("✗ empty"));
            continue;
        }
        println!(
            "  {} {} {}",
            label,
            palette.paint(format!("✓ {} kept", stack.size), ansi::GREEN),
            palette.dim(format!(
                "│ containers {} │ pops {} (+{} diversity) │ recombined {} │ beam {} │ pruned {} │ {:?}",
                stack.containers,
                stack.pops,
                stack.diversity_pops,
                stack.recombined,
                stack.beam_rejected,
                stack.pruned,
                stack.duration
            )),
        );
    }
}

fn print_translation(translation: &Translation, palette: &ansi::Palette) {
    if translation.segments.is_empty() {
        println!("{}", palette.dim("  Nothing translated"));
        return;
    }

    println!(
        "  {} {} {}",
        palette.bold(palette.paint(&translation.text, ansi::GREEN)),
        palette.dim("│"),
        palette.paint(format!("score {:.4}", translation.score), ansi::YELLOW),
    );
    if !translation.complete {
        println!(
            "  {}",
            palette.paint(
                format!(
                    "partial: {} of {} source words covered",
                    translation.covered,
                    translation.source.split_whitespace().count()
                ),
                ansi::YELLOW
            )
        );
    }

    for (idx, seg) in translation.segments.iter().enumerate() {
        let origin = match seg.origin {
            OptionOrigin::Table => palette.dim("table"),
            OptionOrigin::External => palette.paint("extra", ansi::MAGENTA),
        };
        println!(
            "    {} {} {} {} {}",
            palette.paint(format!("[{idx}]"), ansi::GRAY),
            palette.paint(format!("{}", seg.source), ansi::YELLOW),
            palette.paint(&seg.source_text, ansi::CYAN),
            palette.dim("→"),
            palette.paint(&seg.target, ansi::GREEN),
        );
        println!("        {}", origin);
    }

    let features: Vec<String> = translation.features.iter().map(|(name, value)| format!("{name}={value:.4}")).collect();
    println!("  {} {}", palette.dim("features:"), palette.dim(features.join(" ")));
}

/// One line per entry, `<sentence> ||| <text> ||| <score>`.
pub fn print_nbest(sentence: usize, list: &[Translation]) {
    for translation in list {
        println!("{} ||| {} ||| {:.6}", sentence, translation.text, translation.score);
    }
}
