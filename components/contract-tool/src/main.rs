use std::fs;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use contract_metadata::{self as meta, Contract, DataModel};
use log::{debug, info, LevelFilter};

fn out_arg() -> Arg<'static, 'static> {
    Arg::with_name("out")
        .long("out")
        .short("o")
        .value_name("FILE")
        .help("Write to FILE instead of stdout")
        .takes_value(true)
}

fn model_arg() -> Arg<'static, 'static> {
    Arg::with_name("model")
        .long("model")
        .value_name("MODEL")
        .help("C data model to assume: lp64, llp64, ilp32 or ilp32-sysv (defaults to the host's)")
        .takes_value(true)
}

fn app() -> App<'static, 'static> {
    App::new("contract-tool")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect the testdll layout contract and render it for other toolchains")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Log more, repeat for more detail"),
        )
        .subcommand(
            SubCommand::with_name("header")
                .about("Generate the C header declaring the contract")
                .arg(out_arg())
                .arg(
                    Arg::with_name("guard")
                        .long("guard")
                        .value_name("NAME")
                        .help("Wrap the header in an include guard")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("sys-include")
                        .long("sys-include")
                        .value_name("HEADER")
                        .help("Add an `#include <HEADER>`")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("include")
                        .long("include")
                        .value_name("HEADER")
                        .help("Add an `#include \"HEADER\"`")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("flag")
                        .long("flag")
                        .value_name("MACRO")
                        .help("Define MACRO without a value")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("extern-globals")
                        .long("extern-globals")
                        .help("Declare the globals `extern` instead of defining them"),
                )
                .arg(
                    Arg::with_name("no-export-prefix")
                        .long("no-export-prefix")
                        .help("Don't put `__declspec(dllexport)` in front of prototypes"),
                )
                .arg(
                    Arg::with_name("no-version")
                        .long("no-version")
                        .help("Leave out the generator version comment"),
                ),
        )
        .subcommand(
            SubCommand::with_name("metadata")
                .about("Dump the contract as JSON")
                .arg(out_arg()),
        )
        .subcommand(
            SubCommand::with_name("layout")
                .about("Compute the C layout of every contract item")
                .arg(out_arg())
                .arg(model_arg())
                .arg(
                    Arg::with_name("json")
                        .long("json")
                        .help("Print JSON instead of a table"),
                ),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("Check the compiled library against the contract")
                .arg(out_arg()),
        )
        .subcommand(
            SubCommand::with_name("model")
                .about("Dump the signature model used by binding harnesses")
                .arg(out_arg()),
        )
        .subcommand(
            SubCommand::with_name("probe")
                .about("List test values for each parameter of an export")
                .arg(out_arg())
                .arg(model_arg())
                .arg(
                    Arg::with_name("FUNCTION")
                        .help("Name of the exported function")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("mutate")
                        .long("mutate")
                        .value_name("VALUE")
                        .help("A known good value to vary, one per scalar parameter in order")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("mutate-range")
                        .long("mutate-range")
                        .value_name("N")
                        .help("How far around each known good value to go")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("random")
                        .long("random")
                        .value_name("N")
                        .help("Add N random values per parameter")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .value_name("SEED")
                        .help("Seed for --random (defaults to 0)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("no-heuristic")
                        .long("no-heuristic")
                        .help("Leave out the boundary values"),
                ),
        )
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn data_model(matches: &ArgMatches) -> Result<DataModel> {
    match matches.value_of("model") {
        Some(name) => Ok(name.parse()?),
        None => Ok(DataModel::host()),
    }
}

fn header(contract: &Contract, matches: &ArgMatches, out: &mut dyn Write) -> Result<()> {
    let values = |name: &str| -> Vec<String> {
        matches
            .values_of(name)
            .map(|values| values.map(str::to_owned).collect())
            .unwrap_or_default()
    };

    let mut config = c_header::Config {
        include_guard: matches.value_of("guard").map(str::to_owned),
        sys_includes: values("sys-include"),
        includes: values("include"),
        flags: values("flag"),
        extern_globals: matches.is_present("extern-globals"),
        include_version: !matches.is_present("no-version"),
        ..c_header::Config::default()
    };
    if matches.is_present("no-export-prefix") {
        config.export_prefix = None;
    }

    c_header::generate(contract, &config, out).context("failed to write the header")
}

fn layout(contract: &Contract, matches: &ArgMatches, out: &mut dyn Write) -> Result<()> {
    let model = data_model(matches)?;
    let layouts = meta::compute_layouts(contract, model)
        .with_context(|| format!("cannot lay out the contract for {}", model))?;

    if matches.is_present("json") {
        serde_json::to_writer_pretty(&mut *out, &layouts)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "# {}", model)?;
    for layout in &layouts {
        writeln!(out, "{} size {} align {}", layout.name, layout.size, layout.align)?;
        for field in &layout.fields {
            writeln!(out, "    {} +{} ({})", field.name, field.offset, field.size)?;
        }
    }
    Ok(())
}

fn check(contract: &Contract, out: &mut dyn Write) -> Result<()> {
    let analysis = meta::analyze(&contract.items)?;
    if !analysis.opaque_set.is_empty() {
        bail!("{} items cannot be represented in C", analysis.opaque_set.len());
    }

    let names: Vec<_> = contract.functions.iter().map(|x| x.name.as_str()).collect();
    if names != testdll::EXPORTS {
        bail!(
            "exported functions {:?} don't match the contract's {:?}",
            testdll::EXPORTS,
            names
        );
    }
    for name in testdll::EXPORTS {
        debug!("`{}` is exported as `{}`", name, testdll::symbol(name));
    }

    for &model in DataModel::ALL.iter() {
        meta::compute_layouts(contract, model)
            .with_context(|| format!("cannot lay out the contract for {}", model))?;
    }

    let host = DataModel::host();
    let expected = meta::compute_layouts(contract, host)?;
    let measured = testdll::measure();
    meta::compare(&expected, &measured)
        .with_context(|| format!("compiled layouts disagree with {}", host))?;
    info!("{} layouts match {}", measured.len(), host);

    meta::build_model(contract)?;

    writeln!(
        out,
        "ok: {} items, {} functions, layouts match {}",
        contract.items.len(),
        contract.functions.len(),
        host
    )?;
    Ok(())
}

fn model(contract: &Contract, out: &mut dyn Write) -> Result<()> {
    let model = meta::build_model(contract)?;
    serde_json::to_writer_pretty(&mut *out, &model)?;
    writeln!(out)?;
    Ok(())
}

fn number<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match matches.value_of(name) {
        Some(text) => {
            let value = text
                .parse()
                .with_context(|| format!("`--{}` expects a number, got `{}`", name, text))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn probe(contract: &Contract, matches: &ArgMatches, out: &mut dyn Write) -> Result<()> {
    let data_model = data_model(matches)?;
    let model = meta::build_model(contract)?;
    let function = matches.value_of("FUNCTION").unwrap_or_default();

    let codes = meta::probe::scalar_codes(&model, function)?;
    let texts: Vec<_> = matches.values_of("mutate").into_iter().flatten().collect();
    if texts.len() > codes.len() {
        bail!(
            "`{}` has {} scalar parameters but {} values were given",
            function,
            codes.len(),
            texts.len()
        );
    }
    let originals = codes
        .iter()
        .zip(&texts)
        .map(|(code, text)| meta::probe::parse_value(code, text, data_model))
        .collect::<Result<Vec<_>, _>>()?;

    let mut generator = meta::probe::Generator::new(data_model)
        .seed(number(matches, "seed")?.unwrap_or(0))
        .heuristic(!matches.is_present("no-heuristic"))
        .random_cases(number(matches, "random")?.unwrap_or(0));
    if let Some(range) = number(matches, "mutate-range")? {
        generator = generator.mutate_range(range);
    }
    debug!(
        "probing `{}` with {} known good values",
        function,
        originals.len()
    );

    let probes = generator.for_function(&model, function, &originals)?;
    serde_json::to_writer_pretty(&mut *out, &probes)?;
    writeln!(out)?;
    Ok(())
}

fn run(name: &str, matches: &ArgMatches, out: &mut dyn Write) -> Result<()> {
    let contract = testdll::contract().context("the testdll contract is malformed")?;
    debug!(
        "contract `{}`: {} items, {} globals, {} functions",
        contract.name,
        contract.items.len(),
        contract.globals.len(),
        contract.functions.len()
    );

    match name {
        "header" => header(&contract, matches, out),
        "metadata" => {
            serde_json::to_writer_pretty(&mut *out, &contract)?;
            writeln!(out)?;
            Ok(())
        }
        "layout" => layout(&contract, matches, out),
        "check" => check(&contract, out),
        "model" => model(&contract, out),
        "probe" => probe(&contract, matches, out),
        _ => bail!("unknown command `{}`", name),
    }
}

fn main() -> Result<()> {
    let matches = app().get_matches();
    init_logging(matches.occurrences_of("verbose"));

    let (name, sub_matches) = match matches.subcommand() {
        (name, Some(sub_matches)) => (name, sub_matches),
        (name, None) => bail!("missing arguments for `{}`", name),
    };

    match sub_matches.value_of("out") {
        Some(path) => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("couldn't open `{}` for writing", path))?;
            run(name, sub_matches, &mut file)?;
            info!("wrote {}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            run(name, sub_matches, &mut out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(args: &[&str]) -> Result<String> {
        let matches = app().get_matches_from_safe(
            std::iter::once("contract-tool").chain(args.iter().cloned()),
        )?;
        let (name, sub_matches) = matches.subcommand();
        let mut out = Vec::new();
        run(name, sub_matches.unwrap(), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn header_follows_flags() {
        let header = output(&[
            "header",
            "--guard",
            "TESTDLL_H_",
            "--sys-include",
            "windows.h",
            "--no-version",
            "--no-export-prefix",
        ])
        .unwrap();

        assert!(header.starts_with("#if !defined(TESTDLL_H_)\n"));
        assert!(header.contains("#include <windows.h>\n"));
        assert!(header.contains("\nint testten(void);\n"));
        assert!(!header.contains("__declspec"));
    }

    #[test]
    fn lp64_layout_table() {
        let table = output(&["layout", "--model", "lp64"]).unwrap();
        assert!(table.starts_with("# lp64\n"));
        assert!(table.contains("Type1 size 24 align 8\n    a +0 (1)\n    b +2 (2)\n"));
        assert!(table.contains("StructWrapper size 40 align 8\n"));
    }

    #[test]
    fn unknown_data_model_is_rejected() {
        let err = output(&["layout", "--model", "lp128"]).unwrap_err();
        assert!(err.to_string().contains("lp128"));
    }

    #[test]
    fn check_passes_on_the_host() {
        let report = output(&["check"]).unwrap();
        assert!(report.starts_with("ok: 10 items, 12 functions"));
    }

    #[test]
    fn metadata_is_the_contract() {
        let json = output(&["metadata"]).unwrap();
        let parsed: Contract = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, testdll::contract().unwrap());
    }

    #[test]
    fn probe_lists_every_parameter() {
        let json = output(&["probe", "overflow", "--model", "lp64"]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let params = parsed.as_array().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0]["code"], "i");
        assert_eq!(params[1]["code"], "c");

        assert!(output(&["probe", "nosuchfunction"]).is_err());
    }

    fn probe_values(args: &[&str]) -> Vec<Vec<serde_json::Value>> {
        let json = output(args).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|param| param["values"].as_array().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn probe_mutates_known_values() {
        let params = probe_values(&[
            "probe",
            "overflow",
            "--model",
            "lp64",
            "--no-heuristic",
            "--mutate",
            "10",
            "--mutate",
            "q",
            "--mutate-range",
            "1",
        ]);

        let ints: Vec<_> = params[0].iter().map(|x| x["value"].as_i64().unwrap()).collect();
        assert!(ints.contains(&9) && ints.contains(&11) && ints.contains(&40));
        assert!(!ints.contains(&i64::from(i32::MAX)));
        let chars: Vec<_> = params[1].iter().map(|x| x["value"].as_u64().unwrap()).collect();
        assert_eq!(chars, vec![u64::from(b'0'), u64::from(b'9'), u64::from(b'Q')]);

        assert!(output(&["probe", "overflow", "--mutate", "1", "--mutate", "a", "--mutate", "2"]).is_err());
        assert!(output(&["probe", "overflow", "--mutate", "ten"]).is_err());
    }

    #[test]
    fn probe_random_values_follow_the_seed() {
        let args = [
            "probe",
            "overflow",
            "--model",
            "lp64",
            "--no-heuristic",
            "--random",
            "8",
            "--seed",
            "42",
        ];
        let first = probe_values(&args);
        assert_eq!(first, probe_values(&args));
        assert!(!first[0].is_empty() && first[0].len() <= 8);
        assert!(first[0].iter().all(|x| x["kind"] == "signed"));

        assert!(output(&["probe", "overflow", "--random", "many"]).is_err());
    }
}
