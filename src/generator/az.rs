//! Built-in `AzPulse` ruleset: Azerbaijani-language and Azerbaijan-related posts

use std::collections::HashSet;

use regex::RegexBuilder;

use super::ruleset::{ClassificationRuleset, UserRegistry, Verdict, DEFAULT_MAX_LANGUAGES};
use crate::types::{FeedgenError, Result};

/// Feed name, also the last path segment of the feed URI
pub const AZ_PULSE: &str = "AzPulse";

/// Name of the collection holding the feed's entries
pub const FEED_AZ_COLLECTION: &str = "feed_az";

const KEYWORDS: &str = "(azerbaijan|azərbaycan|азербайджан|azerbaycan)";

const SECONDARY_LANGUAGES: [&str; 4] = ["az", "en", "tr", "ru"];

const DENIED: [&str; 33] = [
    "did:plc:5zww7zorx2ajw7hqrhuix3ba",
    "did:plc:c4vhz47h566t2ntgd7gtawen",
    "did:plc:lc7j7xdq67gn7vc6vzmydfqk",
    "did:plc:msian4dqa2rqalf3biilnf3m",
    "did:plc:gtosalycg7snvodjhsze35jm",
    "did:plc:i53e6y3liw2oaw4s6e6odw5m",
    "did:plc:pvdqvmpkeermkhy7fezam473",
    "did:plc:5vwjnzaibnwscbbcvkzhy57v",
    "did:plc:6mfp3coadoobuvlg6w2avw6x",
    "did:plc:lm2uhaoqoe6yo76oeihndfyi",
    "did:plc:vizwdor43adw3277u2kkrssd",
    "did:plc:oqatvbgbhvqbjl2w2o63ehgi",
    "did:plc:gy7yilnydusx5hy2z3dltynp",
    "did:plc:xk7cs24wk6njv42azm2yd7dv",
    "did:plc:ijmt7f4p3dcfqtg3j3zshimn",
    "did:plc:2q5dx6whenn7pnsrfn3jpd6h",
    "did:plc:s2waw3gkmn7h2nn6od44apng",
    "did:plc:4hm6gb7dzobynqrpypif3dck",
    "did:plc:odvarii7w7soygxet3xvzop7",
    "did:plc:5cbkdchsxjvz5fog2oo7m4le",
    "did:plc:ooeuisen5rtr4rojmz7gkbrh",
    "did:plc:6bvhdvgeqkj7nol2zodtqmww",
    "did:plc:k6sxlkd5ssq2uaylzisap2tw",
    "did:plc:uxljnh22mmfzmr4i3oien6mx",
    "did:plc:w5gg2zgwcyfevphehdcmavev",
    "did:plc:ckawbibgmrwg3lbskfppwtlw",
    "did:plc:43fdk46qa5gsokzygzildsaq",
    "did:plc:3szm5t3tknphjtj73twqfonw",
    "did:plc:4ukvsogndgp67sv6f6ohse3y",
    "did:plc:cdplzvv63u5jxb4fxm4vpfgm",
    "did:plc:namifrcorf6hzy45phd4shvt",
    "did:plc:ltvtwjps77bqgm2knhlbswyk",
    "did:plc:acglo4ret2f2wc5duqtispsa",
];

const ALLOWED: [&str; 11] = [
    "did:plc:jbt4qi6psd7rutwzedtecsq7",
    "did:plc:yzgdpxsklrmfgqmjghdvw3ti",
    "did:plc:g7ebgiai577ln3avsi2pt3sn",
    "did:plc:phtq2rhgbwipyx5ie3apw44j",
    "did:plc:jfdvklrs5n5qv7f25v6swc5h",
    "did:plc:u5ez5w6qslh6advti4wyddba",
    "did:plc:x7alwnnjygt2aqcwblhazko7",
    "did:plc:mgciyhgfn65z7iazxuar6o6a",
    "did:plc:ay2f5go4lxq2hspiaqohegac",
    "did:plc:ftoopigdpuzqt2kpeyqxsofx",
    "did:plc:cs2cbzojm6hmx5lfxiuft3mq",
];

/// The `AzPulse` ruleset
pub fn az_pulse() -> Result<ClassificationRuleset> {
    let keywords = RegexBuilder::new(KEYWORDS)
        .case_insensitive(true)
        .build()
        .map_err(|e| FeedgenError::Internal(format!("AzPulse keyword pattern: {}", e)))?;

    let users: UserRegistry = DENIED
        .iter()
        .map(|did| (did.to_string(), Verdict::Deny))
        .chain(ALLOWED.iter().map(|did| (did.to_string(), Verdict::Allow)))
        .collect();

    Ok(ClassificationRuleset {
        name: AZ_PULSE.to_string(),
        users,
        primary_language: "az".to_string(),
        max_languages: DEFAULT_MAX_LANGUAGES,
        keywords,
        secondary_languages: SECONDARY_LANGUAGES.iter().map(|l| l.to_string()).collect::<HashSet<_>>(),
    })
}
