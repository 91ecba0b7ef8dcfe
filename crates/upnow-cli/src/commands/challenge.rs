use std::io::BufRead;

use clap::Subcommand;
use upnow_core::challenge::Judgement;
use upnow_core::{ChallengeEngine, ChallengeType, Config};

use super::CliResult;

#[derive(Subcommand)]
pub enum ChallengeAction {
    /// Print sample challenges
    Sample {
        /// Challenge type: math or typing
        #[arg(long = "type", default_value = "math")]
        challenge_type: ChallengeType,
        /// Number of challenges
        #[arg(long, default_value = "5")]
        count: usize,
        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
        /// Include the expected answer
        #[arg(long)]
        reveal: bool,
    },
    /// Solve a challenge interactively, reading answers from stdin
    Solve {
        /// Challenge type: math or typing
        #[arg(long = "type", default_value = "math")]
        challenge_type: ChallengeType,
        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn engine(seed: Option<u64>) -> ChallengeEngine {
    let config = Config::load_or_default().challenge;
    match seed {
        Some(seed) => ChallengeEngine::seeded(config, seed),
        None => ChallengeEngine::new(config),
    }
}

pub fn run(action: ChallengeAction) -> CliResult {
    match action {
        ChallengeAction::Sample {
            challenge_type,
            count,
            seed,
            reveal,
        } => {
            let mut engine = engine(seed);
            for _ in 0..count {
                let challenge = engine.generate(challenge_type);
                if reveal {
                    println!("{}", serde_json::to_string(challenge.kind())?);
                } else {
                    println!("{}", challenge.prompt());
                }
            }
        }
        ChallengeAction::Solve {
            challenge_type,
            seed,
        } => {
            let mut engine = engine(seed);
            let mut challenge = engine.generate(challenge_type);
            println!("{}", challenge.prompt());

            let mut attempts = 0u32;
            for line in std::io::stdin().lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    println!("Please enter an answer");
                    continue;
                }
                match engine.judge(challenge, &line) {
                    Judgement::Correct => {
                        println!("Correct!");
                        return Ok(());
                    }
                    Judgement::Incorrect { next } => {
                        attempts += 1;
                        println!("Wrong answer, try again!");
                        println!("{}", next.prompt());
                        challenge = next;
                    }
                }
            }
            return Err(format!("input ended unsolved after {attempts} wrong answer(s)").into());
        }
    }
    Ok(())
}
