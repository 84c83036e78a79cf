use anyhow::{anyhow, Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use mobility_ledger::academic::{Credential, Exam, ExamResult, Grade, EXCHANGE_PLAN};
use mobility_ledger::actors::{Student, University};
use mobility_ledger::certificate::CertificationAuthority;
use mobility_ledger::config::Settings;
use mobility_ledger::merkle::MerkleTree;
use mobility_ledger::protocol::{
    authenticate, certify_university, enroll, issue_credential, present_credential,
    request_mobility, revoke_credential, verify_credential, Context,
};
use mobility_ledger::registry::TrustRegistry;
use mobility_ledger::schema;
use mobility_ledger::store::Store;

#[derive(Parser)]
#[command(name = "mobility-ledger")]
#[command(about = "Mobility ledger: certify, present and revoke exchange credentials")]
struct Cli {
    /// Store directory (overrides config and MOBILITY_LEDGER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a full exchange between two universities and persist the result
    Demo,
    /// Print the leaf hashes and Merkle root of a credential
    Seal {
        /// Path to credential JSON
        #[arg(long)]
        credential: PathBuf,
    },
    /// List the stored ledger and check its chain
    Inspect,
    /// Check a credential id against the stored ledger
    Verify {
        #[arg(long)]
        id: String,
        /// Credential JSON whose leaves must belong to the certified tree
        #[arg(long)]
        credential: Option<PathBuf>,
    },
}

fn read_credential(path: &PathBuf) -> Result<Credential> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    schema::validate_credential(&value)?;
    Ok(serde_json::from_value(value)?)
}

fn open_store(settings: &Settings, data_dir: Option<PathBuf>) -> Result<Store> {
    Ok(match data_dir {
        Some(dir) => Store::open(dir)?,
        None => Store::from_settings(settings)?,
    })
}

fn demo(settings: &Settings, store: &Store) -> Result<()> {
    let ctx = Context::new(settings);
    let mut registry = TrustRegistry::from_settings(settings)?;
    let mut ca = CertificationAuthority::new("CA")?;
    let mut home = University::new("U1", "University One", "Bianchi");
    let mut host = University::new("U2", "University Two", "Verdi");
    home.add_study_plan("CS", vec![Exam::new("Algorithms", 6)]);
    host.add_study_plan("DS", vec![Exam::new("Databases", 4)]);
    let mut student = Student::new("S", "Ada", "Lovelace");

    certify_university(&ctx, &mut ca, &mut registry, &mut home)?;
    certify_university(&ctx, &mut ca, &mut registry, &mut host)?;

    enroll(&ctx, &mut student, &mut home, &ca, "CS", "home-pw")?;
    authenticate(&ctx, &mut student, &mut home)?;
    let agreed = request_mobility(
        &ctx,
        &mut student,
        &mut home,
        &mut host,
        &ca,
        &[Exam::new("Databases", 4)],
        &[],
    )?;
    if !agreed {
        return Err(anyhow!("host refused the exchange"));
    }

    enroll(&ctx, &mut student, &mut host, &ca, EXCHANGE_PLAN, "host-pw")?;
    host.pass_exam(
        student.code(),
        ExamResult {
            name: "Databases".into(),
            grade: Grade::Mark(30),
            honours: true,
            date: Utc::now().date_naive(),
            prof: "Neri".into(),
            study_plan_name: EXCHANGE_PLAN.into(),
            cfus: 4,
        },
    )?;
    authenticate(&ctx, &mut student, &mut host)?;
    let issued = issue_credential(&ctx, &mut student, &mut host, &mut registry)?;
    println!("ISSUED {}", issued.id);

    authenticate(&ctx, &mut student, &mut home)?;
    let accepted = present_credential(&ctx, &mut student, &mut home, &mut registry, &[], &[])?;
    println!("PRESENTED accepted={accepted}");

    let tombstone = revoke_credential(&ctx, &mut host, &mut registry, student.code())?;
    println!("REVOKED {} by {tombstone}", issued.id);
    let live = verify_credential(&ctx, &mut home, &mut registry, student.code())?;
    println!("VERIFIED live={live}");

    store.save_registry(&registry)?;
    store.save_authority(&ca)?;
    store.save_university(&home)?;
    store.save_university(&host)?;
    store.save_student(&student)?;
    println!("SAVED {}", store.root().display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    match cli.cmd {
        Cmd::Demo => {
            let store = open_store(&settings, cli.data_dir)?;
            demo(&settings, &store)?;
        }
        Cmd::Seal { credential } => {
            let credential = read_credential(&credential)?;
            let leaves = credential.leaf_hashes()?;
            for (i, leaf) in leaves.iter().enumerate() {
                println!("LEAF {i} {leaf}");
            }
            let tree = MerkleTree::build(&leaves)?;
            println!("ROOT {}", tree.root_hash());
        }
        Cmd::Inspect => {
            let store = open_store(&settings, cli.data_dir)?;
            let registry = store.load_registry()?;
            let ledger = registry.ledger();
            for block in ledger.blocks() {
                let kind = match block.tree() {
                    Some(tree) => format!(
                        "certification root={} live={}",
                        tree.root_hash(),
                        registry.validate_id(&block.id)
                    ),
                    None => format!("tombstone of {}", block.payload.digest()),
                };
                println!("{} prev={} author={} {kind}", block.id, block.prev_id, block.author);
            }
            println!("BLOCKS {} VALID {}", ledger.len(), ledger.is_valid());
        }
        Cmd::Verify { id, credential } => {
            let store = open_store(&settings, cli.data_dir)?;
            let registry = store.load_registry()?;
            let ok = match credential {
                Some(path) => {
                    let credential = read_credential(&path)?;
                    registry.validate_leaves(&credential.leaf_hashes()?, &id)?
                }
                None => registry.validate_id(&id),
            };
            if !ok {
                return Err(anyhow!("{id} is not a live certification for this credential"));
            }
            println!("VERIFIED ✅");
        }
    }
    Ok(())
}
