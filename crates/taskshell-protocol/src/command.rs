/// Shell bootstrap run on V1 endpoints when no command is given.
///
/// Prints the message of the day, fills in a minimal login environment,
/// picks the first available shell (login bash, sh, then the bundled
/// busybox) and hands over to an interactive-shell override when the image
/// provides one.
const V1_BOOTSTRAP: &[&str] = &[
    "if [ -f \"/etc/taskcluster-motd\" ]; then cat /etc/taskcluster-motd; fi;",
    "if [ -z \"$TERM\" ]; then export TERM=xterm; fi;",
    "if [ -z \"$HOME\" ]; then export HOME=/root; fi;",
    "if [ -z \"$USER\" ]; then export USER=root; fi;",
    "if [ -z \"$LOGNAME\" ]; then export LOGNAME=root; fi;",
    "if [ -z `which \"$SHELL\"` ]; then export SHELL=bash; fi;",
    "if [ -z `which \"$SHELL\"` ]; then export SHELL=sh; fi;",
    "if [ -z `which \"$SHELL\"` ]; then export SHELL=\"/.taskclusterutils/busybox sh\"; fi;",
    "SPAWN=\"$SHELL\";",
    "if [ \"$SHELL\" = \"bash\" ]; then SPAWN=\"bash -li\"; fi;",
    "if [ -f \"/bin/taskcluster-interactive-shell\" ]; then SPAWN=\"/bin/taskcluster-interactive-shell\"; fi;",
    "exec $SPAWN;",
];

pub fn v1_bootstrap() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), V1_BOOTSTRAP.concat()]
}
