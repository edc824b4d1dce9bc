//! ジョブ制御のビルトイン: `jobs`、`fg`、`bg`、`wait`、`kill`。

use std::io;

use libc::pid_t;

use super::{fail, out};
use crate::process;
use crate::shell::Shell;
use crate::signals;

/// ジョブ指定の並びを ID に解決する。空なら現在のジョブ。
fn resolve_all(shell: &Shell, name: &str, specs: &[String]) -> Result<Vec<usize>, i32> {
    if specs.is_empty() {
        return shell
            .jobs
            .resolve("%+")
            .map(|id| vec![id])
            .map_err(|_| fail(shell, name, "no current job", 1));
    }
    specs
        .iter()
        .map(|spec| shell.jobs.resolve(spec).map_err(|e| fail(shell, name, e, 1)))
        .collect()
}

/// `jobs [-l|-p] [%job...]`
pub fn jobs(shell: &mut Shell, args: &[String]) -> i32 {
    let mut long = false;
    let mut pids_only = false;
    let mut specs = &args[1..];
    while let Some(flag) = specs.first() {
        match flag.as_str() {
            "-l" => long = true,
            "-p" => pids_only = true,
            _ => break,
        }
        specs = &specs[1..];
    }
    shell.jobs.reap(false);
    let ids: Vec<usize> = if specs.is_empty() {
        shell.jobs.iter().map(|j| j.id).collect()
    } else {
        match resolve_all(shell, "jobs", specs) {
            Ok(ids) => ids,
            Err(status) => return status,
        }
    };
    let mut text = String::new();
    for &id in &ids {
        let Some(job) = shell.jobs.get(id) else { continue };
        if pids_only {
            text.push_str(&format!("{}\n", job.pgid));
        } else {
            text.push_str(&shell.jobs.format_job(job, long));
            text.push('\n');
        }
    }
    for &id in &ids {
        if let Some(job) = shell.jobs.get_mut(id) {
            job.notified = true;
        }
    }
    shell.jobs.remove_finished();
    out(&text)
}

pub fn fg(shell: &mut Shell, args: &[String]) -> i32 {
    if !shell.job_control() {
        return fail(shell, "fg", "no job control", 1);
    }
    match resolve_all(shell, "fg", &args[1..args.len().min(2)]) {
        Ok(ids) => process::resume_foreground(shell, ids[0]),
        Err(status) => status,
    }
}

pub fn bg(shell: &mut Shell, args: &[String]) -> i32 {
    if !shell.job_control() {
        return fail(shell, "bg", "no job control", 1);
    }
    let ids = match resolve_all(shell, "bg", &args[1..]) {
        Ok(ids) => ids,
        Err(status) => return status,
    };
    let mut text = String::new();
    for id in ids {
        let Some(job) = shell.jobs.get(id) else { continue };
        let (pgid, command) = (job.pgid, job.command.clone());
        unsafe {
            libc::kill(-pgid, libc::SIGCONT);
        }
        shell.jobs.mark_running(id);
        text.push_str(&format!("[{id}] {command} &\n"));
    }
    out(&text)
}

/// `wait [pid|%job...]`。引数なしなら全ジョブの終了を待ってステータス 0。
/// 知らない PID は 127。
pub fn wait(shell: &mut Shell, args: &[String]) -> i32 {
    if args.len() == 1 {
        shell.jobs.reap(true);
        let finished: Vec<usize> = shell
            .jobs
            .iter()
            .filter(|j| j.state.is_finished())
            .map(|j| j.id)
            .collect();
        for id in finished {
            shell.jobs.remove(id);
        }
        shell.jobs.forget_retired();
        return 0;
    }
    let mut status = 0;
    for operand in &args[1..] {
        // 表から外れた終了ジョブは記録しておいたステータスを返す
        let id = if operand.starts_with('%') {
            match shell.jobs.resolve(operand) {
                Ok(id) => id,
                Err(e) => {
                    let retired = operand[1..]
                        .parse::<usize>()
                        .ok()
                        .and_then(|id| shell.jobs.take_retired_job(id));
                    status = match retired {
                        Some(s) => s,
                        None => fail(shell, "wait", e, 127),
                    };
                    continue;
                }
            }
        } else {
            match operand.parse::<pid_t>() {
                Ok(pid) => match shell.jobs.find_by_pid(pid) {
                    Some(id) => id,
                    None => {
                        status = shell.jobs.take_retired_pid(pid).unwrap_or(127);
                        continue;
                    }
                },
                Err(_) => {
                    status = fail(shell, "wait", format_args!("{operand}: not a pid or valid job spec"), 2);
                    continue;
                }
            }
        };
        shell.jobs.reap_job(id, true);
        status = shell.jobs.get(id).map_or(127, |j| j.exit_status());
        if shell.jobs.get(id).is_some_and(|j| j.state.is_finished()) {
            shell.jobs.remove(id);
        }
    }
    status
}

// ── kill ─────────────────────────────────────────────────────────────

fn list_signals(shell: &Shell, operand: Option<&String>) -> i32 {
    let Some(operand) = operand else {
        let names: Vec<&str> = signals::all().map(|(_, name)| name).collect();
        return out(&format!("{}\n", names.join(" ")));
    };
    let number = match operand.parse::<i32>() {
        Ok(n) if n > 128 => Some(n - 128),
        Ok(n) => Some(n),
        Err(_) => signals::number_of(operand),
    };
    match number {
        Some(n) if operand.parse::<i32>().is_ok() => match signals::name_of(n) {
            Some(name) => out(&format!("{name}\n")),
            None => fail(shell, "kill", format_args!("{operand}: invalid signal specification"), 1),
        },
        Some(n) => out(&format!("{n}\n")),
        None => fail(shell, "kill", format_args!("{operand}: invalid signal specification"), 1),
    }
}

/// `kill [-s sig | -n num | -sig] pid|%job...`、`kill -l [status]`
pub fn kill(shell: &mut Shell, args: &[String]) -> i32 {
    let mut sig = libc::SIGTERM;
    let mut rest = &args[1..];
    match rest.first().map(String::as_str) {
        None => return fail(shell, "kill", "usage: kill [-s sigspec | -signum] pid | jobspec ...", 2),
        Some("-l") | Some("-L") => return list_signals(shell, rest.get(1)),
        Some("-s") | Some("-n") => {
            let Some(spec) = rest.get(1) else {
                return fail(shell, "kill", "option requires an argument", 2);
            };
            match signals::number_of(spec) {
                Some(n) => sig = n,
                None => return fail(shell, "kill", format_args!("{spec}: invalid signal specification"), 1),
            }
            rest = &rest[2..];
        }
        Some("--") => rest = &rest[1..],
        Some(flag) if flag.starts_with('-') && flag.len() > 1 => {
            let spec = &flag[1..];
            if !spec.bytes().all(|b| b.is_ascii_digit()) || signals::number_of(spec).is_some() {
                match signals::number_of(spec) {
                    Some(n) => sig = n,
                    None => return fail(shell, "kill", format_args!("{spec}: invalid signal specification"), 1),
                }
                rest = &rest[1..];
            }
        }
        Some(_) => {}
    }
    if rest.first().is_some_and(|a| a == "--") {
        rest = &rest[1..];
    }

    let mut status = 0;
    for target in rest {
        let pids: Vec<pid_t> = if target.starts_with('%') {
            match shell.jobs.resolve(target) {
                Ok(id) => {
                    let Some(job) = shell.jobs.get(id) else { continue };
                    if shell.job_control() {
                        vec![-job.pgid]
                    } else {
                        job.processes.iter().map(|p| p.pid).collect()
                    }
                }
                Err(e) => {
                    status = fail(shell, "kill", e, 1);
                    continue;
                }
            }
        } else {
            match target.parse::<pid_t>() {
                Ok(pid) => vec![pid],
                Err(_) => {
                    status = fail(shell, "kill", format_args!("{target}: arguments must be process or job IDs"), 1);
                    continue;
                }
            }
        };
        for pid in pids {
            if unsafe { libc::kill(pid, sig) } < 0 {
                status = fail(shell, "kill", format_args!("({pid}) - {}", io::Error::last_os_error()), 1);
            }
        }
    }
    status
}
