use std::{
    any::Any,
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
};

use super::{CommandOutput, Executor, ExecutorError};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RunArgs {
    pub program: String,
    pub args: Vec<String>,
}

impl RunArgs {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type RunHook = Box<dyn Fn(&[String])>;

/// Scripted stand-in for helper programs.
///
/// Responses are matched on the full command line first and on the program
/// name second; anything unscripted succeeds with empty output. A queue of
/// responses is consumed front to back and its last entry repeats.
#[derive(Default)]
pub struct TestHelperExecutor {
    run_args: RefCell<Vec<RunArgs>>,
    interactive_args: RefCell<Vec<RunArgs>>,
    spawn_args: RefCell<Vec<RunArgs>>,
    responses: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
    hooks: RefCell<HashMap<String, RunHook>>,
    unavailable: RefCell<HashSet<String>>,
    running: RefCell<HashSet<String>>,
    terminated: RefCell<Vec<String>>,
}

impl TestHelperExecutor {
    /// Scripts the output for an exact command line such as `"kpartx -l /dev/sda"`,
    /// or for every invocation of a program when only its name is given.
    pub fn set_response(&self, command_line: &str, output: CommandOutput) {
        self.set_responses(command_line, vec![output]);
    }

    pub fn set_responses(&self, command_line: &str, outputs: Vec<CommandOutput>) {
        self.responses
            .borrow_mut()
            .insert(command_line.to_owned(), outputs.into());
    }

    /// Runs `hook` with the arguments of every invocation of `program`, before
    /// the scripted response is returned.
    pub fn on_run<F>(&self, program: &str, hook: F)
    where
        F: Fn(&[String]) + 'static,
    {
        self.hooks
            .borrow_mut()
            .insert(program.to_owned(), Box::new(hook));
    }

    pub fn set_unavailable(&self, program: &str) {
        self.unavailable.borrow_mut().insert(program.to_owned());
    }

    pub fn set_running(&self, name: &str) {
        self.running.borrow_mut().insert(name.to_owned());
    }

    pub fn get_run_args(&self) -> Vec<RunArgs> {
        self.run_args.borrow().clone()
    }

    /// Invocations rendered as command lines, in call order.
    pub fn get_command_lines(&self) -> Vec<String> {
        self.run_args
            .borrow()
            .iter()
            .map(|r| r.command_line())
            .collect()
    }

    pub fn count_runs(&self, program: &str) -> usize {
        self.run_args
            .borrow()
            .iter()
            .filter(|r| r.program == program)
            .count()
    }

    /// Invocations that ran on the console. They also appear in
    /// `get_run_args`, in call order with the captured ones.
    pub fn get_interactive_args(&self) -> Vec<RunArgs> {
        self.interactive_args.borrow().clone()
    }

    pub fn get_spawn_args(&self) -> Vec<RunArgs> {
        self.spawn_args.borrow().clone()
    }

    pub fn get_terminated(&self) -> Vec<String> {
        self.terminated.borrow().clone()
    }

    fn next_response(&self, key: &str) -> Option<CommandOutput> {
        let mut responses = self.responses.borrow_mut();
        let queue = responses.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Executor for TestHelperExecutor {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecutorError> {
        if self.unavailable.borrow().contains(program) {
            return Err(ExecutorError::NotFound {
                program: program.to_owned(),
            });
        }

        let invocation = RunArgs {
            program: program.to_owned(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };
        self.run_args.borrow_mut().push(invocation.clone());

        if let Some(hook) = self.hooks.borrow().get(program) {
            hook(&invocation.args);
        }

        Ok(self
            .next_response(&invocation.command_line())
            .or_else(|| self.next_response(program))
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn run_interactive(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<Option<i32>, ExecutorError> {
        let output = self.run(program, args)?;
        self.interactive_args.borrow_mut().push(RunArgs {
            program: program.to_owned(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        Ok(output.code)
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<u32, ExecutorError> {
        if self.unavailable.borrow().contains(program) {
            return Err(ExecutorError::NotFound {
                program: program.to_owned(),
            });
        }

        let name = program.rsplit('/').next().unwrap_or(program).to_owned();
        self.spawn_args.borrow_mut().push(RunArgs {
            program: program.to_owned(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self.running.borrow_mut().insert(name);
        Ok(self.spawn_args.borrow().len() as u32 + 1000)
    }

    fn available(&self, program: &str) -> bool {
        !self.unavailable.borrow().contains(program)
    }

    fn is_running(&self, name: &str) -> bool {
        self.running.borrow().contains(name)
    }

    fn terminate(&self, name: &str) {
        self.running.borrow_mut().remove(name);
        self.terminated.borrow_mut().push(name.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscripted_command_succeeds() {
        let executor = TestHelperExecutor::default();
        let output = executor.run("partprobe", &[]).unwrap();
        assert!(output.success());
        assert_eq!(executor.get_command_lines(), vec!["partprobe".to_string()]);
    }

    #[test]
    fn test_exact_command_line_wins_over_program() {
        let executor = TestHelperExecutor::default();
        executor.set_response("kpartx", CommandOutput::ok("generic"));
        executor.set_response("kpartx -l /dev/sda", CommandOutput::ok("specific"));

        assert_eq!(executor.run("kpartx", &["-l", "/dev/sda"]).unwrap().stdout, "specific");
        assert_eq!(executor.run("kpartx", &["-l", "/dev/sdb"]).unwrap().stdout, "generic");
    }

    #[test]
    fn test_response_queue_repeats_last() {
        let executor = TestHelperExecutor::default();
        executor.set_responses(
            "cryptsetup status root",
            vec![CommandOutput::failed(4, ""), CommandOutput::ok("is active")],
        );

        let run = || executor.run("cryptsetup", &["status", "root"]).unwrap();
        assert!(!run().success());
        assert!(run().success());
        assert!(run().success());
    }

    #[test]
    fn test_hook_sees_arguments() {
        let executor = TestHelperExecutor::default();
        let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        executor.on_run("kpartx", move |args| sink.borrow_mut().push(args.join(" ")));

        executor.run("kpartx", &["-afs", "/dev/sda"]).unwrap();
        assert_eq!(*seen.borrow(), vec!["-afs /dev/sda".to_string()]);
    }

    #[test]
    fn test_interactive_run_is_recorded() {
        let executor = TestHelperExecutor::default();
        executor.set_response("fde-unlock", CommandOutput::failed(2, ""));

        let code = executor.run_interactive("fde-unlock", &["/dev/sda2", "0"]).unwrap();
        assert_eq!(code, Some(2));
        assert_eq!(executor.get_interactive_args()[0].command_line(), "fde-unlock /dev/sda2 0");
        assert_eq!(executor.count_runs("fde-unlock"), 1);

        executor.set_unavailable("fde-unlock");
        assert!(executor.run_interactive("fde-unlock", &[]).is_err());
        assert_eq!(executor.get_interactive_args().len(), 1);
    }

    #[test]
    fn test_spawn_marks_running() {
        let executor = TestHelperExecutor::default();
        assert!(!executor.is_running("unudhcpd"));
        executor.spawn("unudhcpd", &["-i", "usb0"]).unwrap();
        assert!(executor.is_running("unudhcpd"));
        executor.terminate("unudhcpd");
        assert!(!executor.is_running("unudhcpd"));
    }
}
