use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use nexus_agent::{PolicySnapshot, Receipt, StepRecord};
use nexus_chain::{
    account_discriminator, find_program_address, instruction_selector, selector_hex, Pubkey,
};
use nexus_orchestrator::{RunOrchestrator, RunOrchestratorConfig, RunPhase, RunSnapshot};
use nexus_policy::{
    evaluate_policy, lamports_to_sol, load_policy, parse_swap_intent, PolicyManager, PolicyRecord,
    Protocol, SavePolicyInput, SavePolicyOutcome, VaultPolicySync,
};

use crate::bootstrap::NexusContext;
use crate::cli_args::{
    Cli, Command, DeriveArgs, OwnerArgs, PolicyCommand, PolicyFetchArgs, PolicySetArgs, RunArgs,
    SelectorArgs,
};
use crate::cli_types::CliPolicySource;

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Selector(args) => {
            println!("{}", render_selector(args));
            Ok(())
        }
        Command::Derive(args) => {
            println!("{}", derive_address(args, cli.policy_program_id.as_deref())?);
            Ok(())
        }
        Command::Run(args) => execute_run(&cli, args).await,
        Command::Policy(command) => execute_policy(&cli, command).await,
        Command::Receipts(args) => list_receipts(&cli, args).await,
    }
}

fn render_selector(args: &SelectorArgs) -> String {
    let name = args.name.trim();
    if args.account {
        selector_hex(&account_discriminator(name))
    } else {
        selector_hex(&instruction_selector(name))
    }
}

fn derive_address(args: &DeriveArgs, configured_program: Option<&str>) -> Result<String> {
    let program = args
        .program
        .as_deref()
        .or(configured_program)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .context("no program id given (set NEXUS_POLICY_PROGRAM_ID or --program)")?
        .parse::<Pubkey>()
        .context("invalid program id")?;
    let owner = args
        .owner
        .trim()
        .parse::<Pubkey>()
        .context("invalid owner address")?;
    let (address, bump) =
        find_program_address(&[args.seed.as_bytes(), owner.as_bytes()], &program)
            .context("failed to derive program address")?;
    Ok(format!("{address} bump={bump}"))
}

async fn execute_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let context = NexusContext::from_cli(cli)?;
    let intent = args.intent_text();

    let policy = load_policy(context.store.as_ref())?;
    if let Some(swap) = parse_swap_intent(&intent) {
        let evaluation = evaluate_policy(&policy, &swap.to_action());
        if !evaluation.allowed {
            bail!(
                "blocked by local policy: {}",
                evaluation.reason.unwrap_or_default()
            );
        }
        tracing::debug!(
            amount_sol = swap.amount_sol,
            to_token = %swap.to_token,
            remaining_sol = evaluation.remaining_sol(),
            "intent passes local policy"
        );
    }

    let orchestrator = RunOrchestrator::new(
        context.agent.clone(),
        context.stream_transport(cli)?,
        context.signer.clone(),
        context.broadcaster(cli),
        RunOrchestratorConfig::default(),
    );
    let mut updates = orchestrator.subscribe();
    let mut printed: Vec<StepRecord> = Vec::new();

    orchestrator.execute_intent(&intent).await;
    let settled = loop {
        let snapshot = updates.borrow_and_update().clone();
        print_new_steps(&mut printed, &snapshot.steps);
        if snapshot.phase != RunPhase::Running {
            break snapshot;
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break orchestrator.snapshot();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.reset_run();
                bail!("run interrupted");
            }
        }
    };

    let settled = match settled.phase {
        RunPhase::AwaitingApproval if args.auto_approve => {
            println!("signing and broadcasting transaction...");
            orchestrator.approve_transaction().await;
            orchestrator.snapshot()
        }
        _ => settled,
    };
    report_outcome(&settled)
}

/// Prints steps past the common prefix of what was already shown.
fn print_new_steps(printed: &mut Vec<StepRecord>, steps: &[StepRecord]) {
    for line in new_step_lines(printed, steps) {
        println!("{line}");
    }
    *printed = steps.to_vec();
}

fn new_step_lines(printed: &[StepRecord], steps: &[StepRecord]) -> Vec<String> {
    let shared = printed
        .iter()
        .zip(steps)
        .take_while(|(left, right)| left == right)
        .count();
    steps[shared..].iter().map(render_step).collect()
}

fn render_step(step: &StepRecord) -> String {
    format!("[{}] {}: {}", step.status.as_str(), step.node, step.label)
}

fn report_outcome(snapshot: &RunSnapshot) -> Result<()> {
    match snapshot.phase {
        RunPhase::Confirmed => {
            println!(
                "confirmed: {}",
                snapshot.confirmed_signature.as_deref().unwrap_or_default()
            );
            Ok(())
        }
        RunPhase::AwaitingApproval => {
            if let Some(simulation) = snapshot
                .result
                .as_ref()
                .and_then(|result| result.simulation.as_ref())
            {
                println!(
                    "simulation: fee={} out_amount={} price_impact={}",
                    simulation.fee, simulation.out_amount, simulation.price_impact
                );
            }
            println!("transaction awaiting approval; rerun with --auto-approve to sign it");
            Ok(())
        }
        RunPhase::Rejected => bail!(
            "rejected by policy: {}",
            snapshot.error.as_deref().unwrap_or_default()
        ),
        RunPhase::Idle | RunPhase::Running | RunPhase::Signing | RunPhase::Error => bail!(
            "{}",
            snapshot
                .error
                .as_deref()
                .unwrap_or("agent run ended unexpectedly")
        ),
    }
}

async fn execute_policy(cli: &Cli, command: &PolicyCommand) -> Result<()> {
    let context = NexusContext::from_cli(cli)?;
    match command {
        PolicyCommand::Show => {
            let policy = load_policy(context.store.as_ref())?;
            println!("{}", render_policy(&policy));
            Ok(())
        }
        PolicyCommand::Set(args) => save_policy(cli, &context, args).await,
        PolicyCommand::Fetch(args) => fetch_policy(&context, args).await,
    }
}

async fn save_policy(cli: &Cli, context: &NexusContext, args: &PolicySetArgs) -> Result<()> {
    let sync = VaultPolicySync::new(
        context.vault.clone(),
        context.signer.clone(),
        context.broadcaster(cli),
    );
    let mut manager = PolicyManager::load(context.store.clone(), Arc::new(sync))?;
    let outcome = manager
        .save(&SavePolicyInput {
            daily_limit_sol: args.daily_limit_sol,
            allowed_protocols: args.protocols.iter().copied().map(Protocol::from).collect(),
            is_active: !args.inactive,
        })
        .await?;
    println!("{}", render_policy(manager.policy()));
    println!("{}", render_save_outcome(&outcome));
    Ok(())
}

fn render_save_outcome(outcome: &SavePolicyOutcome) -> String {
    match (&outcome.signature, &outcome.error) {
        (Some(signature), _) if outcome.synced => format!("saved and synced on-chain: {signature}"),
        (_, Some(error)) => format!("saved locally; on-chain sync failed: {error}"),
        _ => "saved locally".to_string(),
    }
}

async fn fetch_policy(context: &NexusContext, args: &PolicyFetchArgs) -> Result<()> {
    let owner = context.resolve_owner(args.owner.owner.as_deref())?;
    match args.source {
        CliPolicySource::Chain => {
            let addresses = context.vault.addresses_for(&owner)?;
            match context.vault.fetch_policy(&owner).await? {
                Some(account) => {
                    println!("vault: {}", addresses.vault);
                    println!("owner: {}", account.owner);
                    println!("{}", render_policy(&account.policy));
                }
                None => println!("no policy vault at {} for {owner}", addresses.vault),
            }
        }
        CliPolicySource::Agent => {
            let snapshot = context.agent.fetch_policy(&owner.to_string()).await?;
            println!("{}", render_policy_snapshot(&snapshot));
        }
    }
    Ok(())
}

fn render_policy(policy: &PolicyRecord) -> String {
    let protocols: Vec<&str> = policy
        .allowed_protocols
        .iter()
        .map(|protocol| protocol.as_str())
        .collect();
    format!(
        "daily limit: {:.4} SOL\nspent today: {:.4} SOL\nremaining: {:.4} SOL\nprotocols: {}\nactive: {}",
        policy.daily_limit_sol(),
        policy.daily_spent_sol(),
        lamports_to_sol(policy.remaining_lamports()),
        protocols.join(", "),
        policy.is_active
    )
}

fn render_policy_snapshot(snapshot: &PolicySnapshot) -> String {
    if !snapshot.exists {
        return format!("no policy vault for {}", snapshot.owner);
    }
    format!(
        "daily limit: {:.4} SOL\nspent today: {:.4} SOL\nprotocols: {}\nactive: {}\nlast reset: {}",
        lamports_to_sol(snapshot.daily_max_lamports),
        lamports_to_sol(snapshot.current_spend),
        snapshot.allowed_protocols.join(", "),
        snapshot.is_active,
        render_timestamp(snapshot.last_reset_ts)
    )
}

async fn list_receipts(cli: &Cli, args: &OwnerArgs) -> Result<()> {
    let context = NexusContext::from_cli(cli)?;
    let owner = context.resolve_owner(args.owner.as_deref())?;
    let receipts = context.agent.fetch_receipts(&owner.to_string()).await?;
    if receipts.is_empty() {
        println!("no receipts for {owner}");
        return Ok(());
    }
    for receipt in &receipts {
        println!("{}", render_receipt(receipt));
    }
    Ok(())
}

fn render_receipt(receipt: &Receipt) -> String {
    format!(
        "{} {} {:.4} SOL {} {}",
        render_timestamp(receipt.timestamp),
        receipt.protocol,
        lamports_to_sol(receipt.amount_lamports),
        receipt.status,
        receipt.tx_signature
    )
}

fn render_timestamp(unix_seconds: i64) -> String {
    match DateTime::from_timestamp(unix_seconds, 0) {
        Some(moment) if unix_seconds > 0 => moment.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => "-".to_string(),
    }
}
