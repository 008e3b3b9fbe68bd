use {
    crate::it::{testrun::TestRun, tests::TestCase},
    ahash::AHashMap,
    isnt::std_1::{collections::IsntHashMapExt, vec::IsntVecExt},
    log::Level,
    std::{
        fs::File,
        panic::{AssertUnwindSafe, catch_unwind},
        time::SystemTime,
    },
};

#[macro_use]
mod test_error;
#[macro_use]
mod test_macros;
mod test_logger;
mod testrun;

fn run_tests_(tests: Vec<&'static dyn TestCase>) {
    test_logger::install();
    test_logger::set_level(Level::Trace);
    let path = format!(
        "{}/testruns/{}",
        env!("CARGO_MANIFEST_DIR"),
        humantime::format_rfc3339_millis(SystemTime::now())
    );
    let mut failed = AHashMap::new();
    for test in tests {
        let errors = run_test(&path, test);
        if errors.is_not_empty() {
            failed.insert(test.name(), errors);
        }
    }
    if failed.is_not_empty() {
        let mut failed: Vec<_> = failed.iter().collect();
        failed.sort_by_key(|f| f.0);
        log::error!("The following tests failed:");
        for (name, errors) in failed {
            log::error!("    {}:", name);
            for error in errors {
                log::error!("        {}", error);
            }
        }
        panic!("Some tests failed");
    }
}

/// Runs the test with its log redirected into the test directory. Returns the errors.
fn run_test(path: &str, test: &'static dyn TestCase) -> Vec<String> {
    log::info!("Running {}", test.name());
    let dir = format!("{}/{}", path, test.name());
    std::fs::create_dir_all(&dir).unwrap();
    let log_file = File::create(format!("{}/log", dir)).unwrap();
    test_logger::set_file(log_file);
    let testrun = TestRun::new();
    let mut errors = vec![];
    match catch_unwind(AssertUnwindSafe(|| test.run(&testrun))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => errors.push(e.to_string()),
        Err(_) => errors.push("The test panicked".to_string()),
    }
    if let Err(e) = testrun.finish() {
        errors.push(format!("Teardown failed: {}", e));
    }
    for error in &errors {
        log::error!("{}", error);
    }
    test_logger::unset_file();
    errors
}
