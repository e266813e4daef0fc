pub struct Icons;

impl Icons {
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DATABASE: &str = "🗄️";
    pub const INBOX: &str = "📥";
    pub const OUTBOX: &str = "📤";
    pub const DEL: &str = "🗑️";
    pub const MERGE: &str = "🔀";
    pub const WRENCH: &str = "🔧";
}
