use std::{env, fs::File, io::Read};

use anyhow::{Context, Result};
use scannerless_parser::{
    api::{LanguageIdentity, ParseOptions, ParserLimits},
    interrupt::NoInterrupt,
    LanguageProcessor, Logger,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: {} <grammar.agl> <input> [goal_rule]", args[0]);
        std::process::exit(1);
    }

    let grammar = read_file_to_string(&args[1])?;
    let input = read_file_to_string(&args[2])?;

    // set to 2 for more output
    let stderr_log_level = 1;

    let mut processor = match LanguageProcessor::from_grammar(
        LanguageIdentity::new("sample"),
        &grammar,
        None,
        Logger::new(2, stderr_log_level),
        ParserLimits::default(),
    ) {
        Ok(p) => p,
        Err(issue) => {
            eprintln!("{}: {:?}: {}", args[1], issue.code, issue.message);
            std::process::exit(1);
        }
    };

    let options = match args.get(3) {
        Some(goal) => ParseOptions::with_goal(goal),
        None => ParseOptions::default(),
    };
    let result = processor.parse(&input, &options, &NoInterrupt);
    send_output(&processor.logger.get_and_clear_logs());

    match &result.sppt {
        Some(tree) => {
            println!("{}", tree.to_compact_string(false));
            if tree.is_ambiguous() {
                eprintln!("{} ambiguous nodes", tree.ambiguous_nodes().len());
            }
        }
        None => {
            for issue in &result.issues {
                match issue.location {
                    Some(l) => eprintln!(
                        "{}:{}:{}: {:?}: {}",
                        args[2], l.line, l.column, issue.code, issue.message
                    ),
                    None => eprintln!("{}: {:?}: {}", args[2], issue.code, issue.message),
                }
            }
            std::process::exit(1);
        }
    }
    eprintln!("Stats: {}", serde_json::to_string(&result.stats)?);
    Ok(())
}

fn read_file_to_string(filename: &str) -> Result<String> {
    let mut file = File::open(filename).with_context(|| format!("unable to open {filename}"))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("unable to read {filename}"))?;
    Ok(content)
}

fn send_output(user_output: &str) {
    // enable if you want to see the output
    if false {
        println!("{}", user_output);
    }
}
